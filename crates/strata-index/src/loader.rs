use std::path::Path;

use strata_core::{Document, StrataError};
use tracing::{debug, warn};

/// Maximum file size to load (16 MB).
const MAX_FILE_SIZE: u64 = 16 * 1_048_576;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// Extensions picked up when walking a directory.
const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "rst"];

/// Load UTF-8 text documents from files and directories.
///
/// A file path is always read. A directory is walked recursively, respecting
/// `.gitignore`, and only files with a text extension (`txt`, `md`, `rst`,
/// ...) are read. Binary, oversized and whitespace-only files are skipped
/// with a warning. Each document's id is its path as reached from the
/// input. Documents are returned sorted by id.
///
/// # Errors
///
/// Returns [`StrataError::Io`] if an explicitly named file cannot be read or
/// a path does not exist, and [`StrataError::Chunking`] if nothing loadable
/// was found.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use strata_index::loader::load_documents;
///
/// let docs = load_documents(&[PathBuf::from("corpus/")]).unwrap();
/// println!("{} documents", docs.len());
/// ```
pub fn load_documents<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Document>, StrataError> {
    let mut docs = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            walk_dir(path, &mut docs);
        } else {
            let text = std::fs::read_to_string(path)?;
            if text.trim().is_empty() {
                warn!(path = %path.display(), "skipping blank file");
                continue;
            }
            docs.push(Document::new(path.display().to_string(), text));
        }
    }

    if docs.is_empty() {
        return Err(StrataError::Chunking(
            "no non-empty text documents found in the given paths".into(),
        ));
    }

    docs.sort_by(|a, b| a.id.cmp(&b.id));
    docs.dedup_by(|a, b| a.id == b.id);
    debug!(documents = docs.len(), "loaded documents");
    Ok(docs)
}

fn walk_dir(root: &Path, docs: &mut Vec<Document>) {
    let walker = ignore::WalkBuilder::new(root).build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if !is_text {
            continue;
        }

        match std::fs::metadata(path) {
            Ok(m) if m.len() > MAX_FILE_SIZE => {
                warn!(path = %path.display(), bytes = m.len(), "skipping oversized file");
                continue;
            }
            Ok(_) => {}
            Err(_) => continue,
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping non UTF-8 file");
                continue;
            }
        };

        let check_len = content.len().min(BINARY_CHECK_SIZE);
        if content.as_bytes()[..check_len].contains(&0) {
            warn!(path = %path.display(), "skipping binary file");
            continue;
        }
        if content.trim().is_empty() {
            warn!(path = %path.display(), "skipping blank file");
            continue;
        }

        docs.push(Document::new(path.display().to_string(), content));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_corpus() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("notes")).unwrap();
        fs::write(root.join("a.txt"), "xAI was founded in 2023.").unwrap();
        fs::write(root.join("notes/b.md"), "# Grok\n\nGrok is a chatbot.").unwrap();
        fs::write(root.join("notes/empty.txt"), "   \n").unwrap();
        fs::write(root.join("data.csv"), "a,b,c").unwrap();
        fs::write(root.join("blob.txt"), b"abc\0def").unwrap();
        dir
    }

    #[test]
    fn walks_text_files_only() {
        let dir = make_corpus();
        let docs = load_documents(&[dir.path()]).unwrap();
        let names: Vec<String> = docs
            .iter()
            .map(|d| {
                Path::new(&d.id)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
    }

    #[test]
    fn explicit_file_is_read_whatever_its_extension() {
        let dir = make_corpus();
        let docs = load_documents(&[dir.path().join("data.csv")]).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "a,b,c");
    }

    #[test]
    fn same_file_twice_loads_once() {
        let dir = make_corpus();
        let file = dir.path().join("a.txt");
        let docs = load_documents(&[file.clone(), file]).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn missing_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_documents(&[dir.path().join("nope.txt")]);
        assert!(matches!(result, Err(StrataError::Io(_))));
    }

    #[test]
    fn nothing_loadable_is_chunking_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("only.csv"), "1,2").unwrap();
        assert!(matches!(
            load_documents(&[dir.path()]),
            Err(StrataError::Chunking(_))
        ));
    }
}
