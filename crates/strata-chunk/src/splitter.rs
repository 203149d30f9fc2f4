//! Size-bounded text splitting that prefers semantic boundaries.
//!
//! A span is first decomposed into atoms no larger than the bound, trying
//! separators from coarsest to finest:
//!
//! 1. paragraph breaks (`\n\n`)
//! 2. sentence boundaries (UAX #29)
//! 3. word boundaries (UAX #29)
//! 4. fixed character runs
//!
//! Atoms are then packed greedily into chunks. Without overlap the returned
//! ranges partition the input exactly; with overlap each chunk starts with the
//! trailing atoms of the previous one.

use std::ops::Range;

use strata_core::{SizeUnit, StrataError};
use unicode_segmentation::UnicodeSegmentation;

/// Approximate characters-per-token ratio used by [`SizeUnit::Tokens`].
const CHARS_PER_TOKEN: usize = 4;

/// Deepest decomposition level (fixed character runs).
const CHAR_LEVEL: usize = 3;

/// Splits text into byte ranges whose measured size respects a bound.
///
/// # Examples
///
/// ```
/// use strata_chunk::TextSplitter;
/// use strata_core::SizeUnit;
///
/// let splitter = TextSplitter::new(20, SizeUnit::Chars).unwrap();
/// let text = "One short line. Another short line.";
/// let ranges = splitter.split(text);
/// assert_eq!(ranges.len(), 2);
/// assert_eq!(&text[ranges[0].clone()], "One short line. ");
/// ```
#[derive(Debug, Clone)]
pub struct TextSplitter {
    max_size: usize,
    overlap: usize,
    unit: SizeUnit,
}

impl TextSplitter {
    /// Create a splitter without overlap.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if `max_size` is zero.
    pub fn new(max_size: usize, unit: SizeUnit) -> Result<Self, StrataError> {
        if max_size == 0 {
            return Err(StrataError::Chunking("chunk size must be > 0".into()));
        }
        Ok(Self {
            max_size,
            overlap: 0,
            unit,
        })
    }

    /// Set the overlap between successive chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if `overlap >= max_size`.
    pub fn with_overlap(mut self, overlap: usize) -> Result<Self, StrataError> {
        if overlap >= self.max_size {
            return Err(StrataError::Chunking(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({})",
                self.max_size
            )));
        }
        self.overlap = overlap;
        Ok(self)
    }

    /// The size bound.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Size of `text` in the configured unit. Trailing whitespace is free.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_chunk::TextSplitter;
    /// use strata_core::SizeUnit;
    ///
    /// let chars = TextSplitter::new(10, SizeUnit::Chars).unwrap();
    /// assert_eq!(chars.measure("héllo  \n"), 5);
    ///
    /// let tokens = TextSplitter::new(10, SizeUnit::Tokens).unwrap();
    /// assert_eq!(tokens.measure("abcdefghi"), 3);
    /// ```
    pub fn measure(&self, text: &str) -> usize {
        let chars = text.trim_end().chars().count();
        match self.unit {
            SizeUnit::Chars => chars,
            SizeUnit::Tokens => chars.div_ceil(CHARS_PER_TOKEN),
        }
    }

    /// Split `text` into byte ranges relative to its start.
    ///
    /// Empty input yields no ranges.
    pub fn split(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut atoms = Vec::new();
        self.atomize(text, 0, 0, &mut atoms);

        let mut ranges = Vec::new();
        let mut first = 0;
        while first < atoms.len() {
            let start = atoms[first].start;
            let mut last = first;
            while last + 1 < atoms.len()
                && self.measure(&text[start..atoms[last + 1].end]) <= self.max_size
            {
                last += 1;
            }
            ranges.push(start..atoms[last].end);

            if last + 1 >= atoms.len() {
                break;
            }

            let mut next = last + 1;
            if self.overlap > 0 {
                let end = atoms[last].end;
                while next - 1 > first
                    && self.measure(&text[atoms[next - 1].start..end]) <= self.overlap
                {
                    next -= 1;
                }
                // The overlapped chunk must still reach at least one new atom.
                if self.measure(&text[atoms[next].start..atoms[last + 1].end]) > self.max_size {
                    next = last + 1;
                }
            }
            first = next;
        }

        ranges
    }

    fn atomize(&self, text: &str, offset: usize, level: usize, out: &mut Vec<Range<usize>>) {
        if text.is_empty() {
            return;
        }
        if self.measure(text) <= self.max_size {
            out.push(offset..offset + text.len());
            return;
        }
        if level >= CHAR_LEVEL {
            self.split_chars(text, offset, out);
            return;
        }

        let pieces: Vec<(usize, &str)> = match level {
            0 => split_paragraphs(text),
            1 => text.split_sentence_bound_indices().collect(),
            _ => text.split_word_bound_indices().collect(),
        };

        for (start, piece) in pieces {
            self.atomize(piece, offset + start, level + 1, out);
        }
    }

    fn split_chars(&self, text: &str, offset: usize, out: &mut Vec<Range<usize>>) {
        let budget = match self.unit {
            SizeUnit::Chars => self.max_size,
            SizeUnit::Tokens => self.max_size * CHARS_PER_TOKEN,
        };

        let mut start = 0;
        let mut count = 0;
        for (i, _) in text.char_indices() {
            if count == budget {
                out.push(offset + start..offset + i);
                start = i;
                count = 0;
            }
            count += 1;
        }
        if start < text.len() {
            out.push(offset + start..offset + text.len());
        }
    }
}

/// Split after each run of blank lines, keeping separators with the
/// preceding paragraph.
fn split_paragraphs(text: &str) -> Vec<(usize, &str)> {
    let bytes = text.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            let mut end = i + 2;
            while end < bytes.len() && (bytes[end] == b'\n' || bytes[end] == b'\r') {
                end += 1;
            }
            pieces.push((start, &text[start..end]));
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }
    if start < text.len() {
        pieces.push((start, &text[start..]));
    }

    pieces
}
