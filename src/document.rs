use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single input text, identified by (author, title, path).
///
/// Content is loaded lazily on first access and kept for the rest of the
/// run. Documents produced in memory (chunk output before it is written,
/// test fixtures) carry no path; those bypass the on-disk cache.
#[derive(Debug)]
pub struct Document {
    pub author: String,
    pub title: String,
    path: Option<PathBuf>,
    text: OnceLock<String>,
}

impl Clone for Document {
    fn clone(&self) -> Self {
        let text = OnceLock::new();
        if let Some(t) = self.text.get() {
            let _ = text.set(t.clone());
        }
        Self {
            author: self.author.clone(),
            title: self.title.clone(),
            path: self.path.clone(),
            text,
        }
    }
}

impl Document {
    /// Create a file-backed document. The file is not touched until the
    /// text or its timestamp is first requested.
    pub fn from_path(author: &str, title: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            author: author.to_string(),
            title: title.to_string(),
            path: Some(path.into()),
            text: OnceLock::new(),
        }
    }

    /// Create an in-memory document with no backing file.
    pub fn from_text(author: &str, title: &str, text: &str) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(text.to_string());
        Self {
            author: author.to_string(),
            title: title.to_string(),
            path: None,
            text: cell,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Canonical form of the backing path. `None` for in-memory documents.
    pub fn canonical_path(&self) -> Option<Result<PathBuf>> {
        self.path
            .as_deref()
            .map(|p| fs::canonicalize(p).map_err(Error::from))
    }

    /// Last-modified timestamp of the backing file in whole milliseconds
    /// since the Unix epoch. `None` for in-memory documents.
    pub fn modified_millis(&self) -> Option<Result<u64>> {
        let path = self.path.as_deref()?;
        Some(modified_millis_of(path))
    }

    /// Document text, reading the backing file on first access.
    pub fn text(&self) -> Result<&str> {
        if let Some(t) = self.text.get() {
            return Ok(t.as_str());
        }
        let path = self
            .path
            .as_deref()
            .expect("pathless document is always pre-loaded");
        let loaded = fs::read_to_string(path)?;
        Ok(self.text.get_or_init(|| loaded).as_str())
    }
}

/// Read a file's mtime as whole milliseconds since the Unix epoch.
pub fn modified_millis_of(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path)?;
    let modified = meta.modified()?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Ok(millis)
}

/// Per-document normalization baselines.
///
/// One of these counts divides each feature definition's column span during
/// normalization, chosen per definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BaselineCounts {
    pub sentences: u64,
    pub words: u64,
    pub chars: u64,
    pub letters: u64,
}

/// Count the four normalization baselines over a text.
///
/// Sentences are terminator runs (`.`, `!`, `?` sequences count once), words
/// are whitespace-separated runs, chars are Unicode scalar values, letters
/// are alphabetic scalar values.
pub fn count_baselines(text: &str) -> BaselineCounts {
    let mut sentences = 0u64;
    let mut in_terminator = false;
    let mut chars = 0u64;
    let mut letters = 0u64;
    for c in text.chars() {
        chars += 1;
        if c.is_alphabetic() {
            letters += 1;
        }
        let terminator = matches!(c, '.' | '!' | '?');
        if terminator && !in_terminator {
            sentences += 1;
        }
        in_terminator = terminator;
    }
    let words = text.split_whitespace().count() as u64;
    BaselineCounts {
        sentences,
        words,
        chars,
        letters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baselines_count_terminator_runs_once() {
        let b = count_baselines("One. Two!? Three...");
        assert_eq!(b.sentences, 3);
        assert_eq!(b.words, 3);
    }

    #[test]
    fn baselines_letters_exclude_digits_and_punct() {
        let b = count_baselines("ab1 c.");
        assert_eq!(b.letters, 3);
        assert_eq!(b.chars, 6);
        assert_eq!(b.words, 2);
        assert_eq!(b.sentences, 1);
    }

    #[test]
    fn in_memory_document_serves_text_without_a_path() {
        let doc = Document::from_text("a", "t", "hello world");
        assert_eq!(doc.text().unwrap(), "hello world");
        assert!(doc.path().is_none());
        assert!(doc.modified_millis().is_none());
    }

    #[test]
    fn file_document_loads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, "from disk").unwrap();
        let doc = Document::from_path("a", "t", &path);
        assert_eq!(doc.text().unwrap(), "from disk");
        // second access serves the cached copy
        assert_eq!(doc.text().unwrap(), "from disk");
        assert!(doc.modified_millis().unwrap().unwrap() > 0);
    }
}
