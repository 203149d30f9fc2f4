//! Sentence-window expansion.
//!
//! Matched sentences are replaced by their surrounding window. Windows from
//! the same document that share at least one sentence are merged into a
//! single passage; windows that merely touch stay separate.

use std::collections::{BTreeMap, HashMap};

use strata_core::{
    NodeId, Passage, ScoredNode, Span, StrataError, SENTENCE_INDEX_KEY, WINDOW_END_KEY,
    WINDOW_KEY, WINDOW_START_KEY,
};
use strata_index::NodeStore;
use tracing::debug;

#[derive(Debug, Clone)]
struct Window {
    source_id: String,
    start: usize,
    end: usize,
    score: f32,
    rank: usize,
    best: NodeId,
    members: Vec<NodeId>,
}

/// Expands sentence hits into windows over a fixed node store.
#[derive(Debug, Clone)]
pub struct WindowExpander {
    sentences: HashMap<(String, usize), NodeId>,
}

impl WindowExpander {
    /// Index the sentence nodes of `store` by `(source, sentence_index)`.
    pub fn new(store: &NodeStore) -> Self {
        let sentences = store
            .iter()
            .filter_map(|n| {
                n.metadata_usize(SENTENCE_INDEX_KEY)
                    .map(|i| ((n.source_id.clone(), i), n.id.clone()))
            })
            .collect();
        Self { sentences }
    }

    /// Replace each hit with its window, merging overlapping windows.
    ///
    /// Output is ordered by best original rank.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Merge`] if a hit is not a window node or a
    /// sentence covered by a window is missing.
    pub fn expand(
        &self,
        hits: &[ScoredNode],
        store: &NodeStore,
    ) -> Result<Vec<Passage>, StrataError> {
        let mut best: BTreeMap<NodeId, &ScoredNode> = BTreeMap::new();
        for hit in hits {
            let keep = best
                .get(&hit.id)
                .map_or(true, |b| hit.score > b.score || (hit.score == b.score && hit.rank < b.rank));
            if keep {
                best.insert(hit.id.clone(), hit);
            }
        }

        let mut windows = Vec::with_capacity(best.len());
        for (id, hit) in best {
            let node = store.get(&id).map_err(|_| StrataError::Merge {
                id: id.clone(),
                reason: "retrieved sentence is not in the store".into(),
            })?;
            let bound = |key: &str| {
                node.metadata_usize(key).ok_or_else(|| StrataError::Merge {
                    id: id.clone(),
                    reason: format!("node has no '{key}' metadata; was the index built in window mode?"),
                })
            };
            windows.push(Window {
                source_id: node.source_id.clone(),
                start: bound(WINDOW_START_KEY)?,
                end: bound(WINDOW_END_KEY)?,
                score: hit.score,
                rank: hit.rank,
                best: id.clone(),
                members: vec![id.clone()],
            });
        }

        windows.sort_by(|a, b| {
            (a.source_id.as_str(), a.start, a.end).cmp(&(b.source_id.as_str(), b.start, b.end))
        });

        let mut merged: Vec<Window> = Vec::new();
        for window in windows {
            match merged.last_mut() {
                Some(last) if last.source_id == window.source_id && window.start <= last.end => {
                    last.end = last.end.max(window.end);
                    if window.rank < last.rank {
                        last.rank = window.rank;
                        last.best = window.best.clone();
                    }
                    last.score = last.score.max(window.score);
                    last.members.extend(window.members);
                }
                _ => merged.push(window),
            }
        }
        merged.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.best.cmp(&b.best)));

        let passages = merged
            .into_iter()
            .map(|w| self.to_passage(w, store))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(hits = hits.len(), windows = passages.len(), "expanded sentence windows");
        Ok(passages)
    }

    fn to_passage(&self, window: Window, store: &NodeStore) -> Result<Passage, StrataError> {
        let mut text = String::new();
        let mut span: Option<Span> = None;
        for index in window.start..=window.end {
            let sentence = self
                .sentences
                .get(&(window.source_id.clone(), index))
                .and_then(|id| store.lookup(id))
                .ok_or_else(|| StrataError::Merge {
                    id: window.best.clone(),
                    reason: format!(
                        "sentence {index} of '{}' is missing from the store",
                        window.source_id
                    ),
                })?;
            text.push_str(&sentence.text);
            span = Some(match span {
                Some(s) => Span::new(s.start, sentence.span.end),
                None => sentence.span,
            });
        }

        let node = store.get(&window.best)?;
        let mut passage = Passage::from_node(node, window.score);
        if window.members.len() == 1 {
            if let Some(own) = node.metadata.get(WINDOW_KEY) {
                text = own.clone();
            }
        } else {
            let mut members = window.members;
            members.sort();
            passage.merged_from = members;
        }
        passage.text = text;
        passage.span = span.unwrap_or(node.span);
        Ok(passage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_chunk::SentenceWindowParser;
    use strata_core::Document;

    fn store(text: &str, window: usize) -> NodeStore {
        let tree = SentenceWindowParser::new(window)
            .parse(&Document::new("d", text))
            .unwrap();
        NodeStore::from_nodes(tree.nodes).unwrap()
    }

    fn ten_sentences() -> String {
        (0..10).map(|i| format!("Sentence {i}. ")).collect()
    }

    fn sentence_id(store: &NodeStore, index: usize) -> NodeId {
        store
            .iter()
            .find(|n| n.metadata_usize(SENTENCE_INDEX_KEY) == Some(index))
            .unwrap()
            .id
            .clone()
    }

    fn hit(id: NodeId, score: f32, rank: usize) -> ScoredNode {
        ScoredNode { id, score, rank }
    }

    #[test]
    fn single_hit_is_replaced_by_window() {
        let store = store(&ten_sentences(), 1);
        let expander = WindowExpander::new(&store);
        let passages = expander
            .expand(&[hit(sentence_id(&store, 4), 0.8, 0)], &store)
            .unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "Sentence 3. Sentence 4. Sentence 5. ");
        assert!(passages[0].merged_from.is_empty());
    }

    #[test]
    fn overlapping_windows_merge_without_duplicates() {
        let store = store(&ten_sentences(), 1);
        let expander = WindowExpander::new(&store);
        let hits = vec![
            hit(sentence_id(&store, 5), 0.6, 1),
            hit(sentence_id(&store, 3), 0.9, 0),
        ];
        let passages = expander.expand(&hits, &store).unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(
            passages[0].text,
            "Sentence 2. Sentence 3. Sentence 4. Sentence 5. Sentence 6. "
        );
        assert_eq!(passages[0].score, 0.9);
        assert_eq!(passages[0].id, sentence_id(&store, 3));
        assert_eq!(passages[0].merged_from.len(), 2);
    }

    #[test]
    fn touching_windows_stay_separate() {
        let store = store(&ten_sentences(), 1);
        let expander = WindowExpander::new(&store);
        // windows [1..=3] and [4..=6] touch but share no sentence
        let hits = vec![
            hit(sentence_id(&store, 2), 0.9, 0),
            hit(sentence_id(&store, 5), 0.7, 1),
        ];
        let passages = expander.expand(&hits, &store).unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].text, "Sentence 1. Sentence 2. Sentence 3. ");
        assert_eq!(passages[1].text, "Sentence 4. Sentence 5. Sentence 6. ");
    }

    #[test]
    fn output_follows_rank() {
        let store = store(&ten_sentences(), 0);
        let expander = WindowExpander::new(&store);
        let hits = vec![
            hit(sentence_id(&store, 8), 0.9, 0),
            hit(sentence_id(&store, 1), 0.5, 1),
        ];
        let passages = expander.expand(&hits, &store).unwrap();
        assert_eq!(passages[0].text, "Sentence 8. ");
        assert_eq!(passages[1].text, "Sentence 1. ");
    }

    #[test]
    fn missing_sentence_is_merge_error() {
        let full = store(&ten_sentences(), 2);
        let expander = WindowExpander::new(&full);
        let target = sentence_id(&full, 5);
        let gone = sentence_id(&full, 4);
        let partial = NodeStore::from_nodes(
            full.iter().filter(|n| n.id != gone).cloned().collect(),
        )
        .unwrap();
        let err = expander
            .expand(&[hit(target, 1.0, 0)], &partial)
            .unwrap_err();
        assert!(matches!(err, StrataError::Merge { .. }));
    }

    #[test]
    fn non_window_node_is_merge_error() {
        let node = strata_core::ChunkNode::new("d", 0, Span::new(0, 4), "text");
        let id = node.id.clone();
        let store = NodeStore::from_nodes(vec![node]).unwrap();
        let expander = WindowExpander::new(&store);
        assert!(matches!(
            expander.expand(&[hit(id, 1.0, 0)], &store),
            Err(StrataError::Merge { .. })
        ));
    }
}
