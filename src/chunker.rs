//! Length normalization of training corpora.
//!
//! Long training documents bias classifiers toward document-length
//! artifacts, so each author's training text is re-cut into chunks whose
//! size roughly matches the test document. Chunks are cached per author
//! and regenerated only when the target size drifts outside tolerance or
//! any source document changes.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::cache::sanitize;
use crate::document::Document;
use crate::error::{Error, Result};

const META_FILE: &str = "chunks.meta";

/// Chunk-size policy.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Smallest chunk ever emitted.
    pub min_size: usize,
    /// Target size when there is no test document to match.
    pub default_size: usize,
    /// Upper clamp on the target size; `None` leaves it unbounded.
    pub max_size: Option<usize>,
    /// Relative slack used both for accepting a short final chunk and for
    /// judging whether cached chunks still match the current target size.
    pub tolerance: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 475,
            default_size: 500,
            max_size: None,
            tolerance: 0.05,
        }
    }
}

/// Splits each author's concatenated training text into near-equal word
/// runs, with an on-disk cache keyed by (author, target size, source
/// timestamps).
///
/// The chunker remembers each author's original document list the first
/// time it sees the author, so repeated runs always chunk the originals
/// and never re-chunk chunk output.
pub struct Chunker {
    root: PathBuf,
    config: ChunkerConfig,
    originals: IndexMap<String, Vec<Document>>,
}

impl Chunker {
    pub fn new(root: impl Into<PathBuf>, config: ChunkerConfig) -> Self {
        Self {
            root: root.into(),
            config,
            originals: IndexMap::new(),
        }
    }

    /// Target chunk size: word count of the first test document, clamped
    /// to the configured bounds.
    pub fn desired_size(&self, test_docs: &[Document]) -> usize {
        let raw = test_docs
            .first()
            .and_then(|doc| doc.text().ok().map(|t| t.split_whitespace().count()))
            .unwrap_or(self.config.default_size);
        let lower = raw.max(self.config.min_size);
        match self.config.max_size {
            Some(max) => lower.min(max),
            None => lower,
        }
    }

    /// Rewrite the training corpus in place so every author contributes
    /// chunks of roughly `desired_size(test_docs)` words.
    ///
    /// An author whose chunking fails keeps their original documents; the
    /// failure is logged and the run continues.
    pub fn chunk_corpus(&mut self, training: &mut Vec<Document>, test_docs: &[Document]) -> Result<()> {
        let desired = self.desired_size(test_docs);
        let mut by_author: IndexMap<String, Vec<Document>> = IndexMap::new();
        for doc in training.drain(..) {
            by_author.entry(doc.author.clone()).or_default().push(doc);
        }

        for (author, docs) in by_author {
            // snapshot the pre-chunking list exactly once per author
            let originals = self
                .originals
                .entry(author.clone())
                .or_insert_with(|| docs.clone())
                .clone();
            match self.chunks_for_author(&author, &originals, desired) {
                Ok(chunks) => training.extend(chunks),
                Err(err) => {
                    warn!(author = %author, error = %err, "chunking failed, keeping original documents");
                    training.extend(originals);
                }
            }
        }
        Ok(())
    }

    fn chunks_for_author(
        &self,
        author: &str,
        originals: &[Document],
        desired: usize,
    ) -> Result<Vec<Document>> {
        // title order fixes both concatenation and the timestamp list
        let mut sorted: Vec<&Document> = originals.iter().collect();
        sorted.sort_by(|a, b| a.title.cmp(&b.title));

        let mut timestamps = Vec::with_capacity(sorted.len());
        for doc in &sorted {
            match doc.modified_millis() {
                Some(ts) => timestamps.push(ts?),
                None => timestamps.push(0),
            }
        }

        let author_dir = self.root.join(sanitize(author));
        if self.cache_valid(&author_dir, desired, &timestamps) {
            debug!(author = %author, "serving chunks from cache");
            return self.load_chunks(author, &author_dir);
        }

        if author_dir.exists() {
            fs::remove_dir_all(&author_dir)?;
        }
        fs::create_dir_all(&author_dir)?;

        let mut words: Vec<String> = Vec::new();
        for doc in &sorted {
            let text = doc
                .text()
                .map_err(|e| Error::chunking(author, e.to_string()))?;
            words.extend(text.split_whitespace().map(|w| w.to_string()));
        }

        let sizes = chunk_sizes(words.len(), desired, self.config.min_size, self.config.tolerance);
        if sizes.is_empty() {
            return Err(Error::chunking(
                author,
                format!("only {} words, need at least one chunk of {}", words.len(), desired),
            ));
        }

        let mut chunks = Vec::with_capacity(sizes.len());
        let mut offset = 0usize;
        for (n, size) in sizes.iter().enumerate() {
            let body = words[offset..offset + size].join(" ");
            offset += size;
            let title = format!("chunk-{:04}", n + 1);
            let path = author_dir.join(format!("{:04}.txt", n + 1));
            fs::write(&path, &body)?;
            chunks.push(Document::from_path(author, &title, path));
        }

        let meta = format!(
            "{}\n{}\n",
            desired,
            timestamps
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        fs::write(author_dir.join(META_FILE), meta)?;
        Ok(chunks)
    }

    /// Cached chunks are reusable when the stored target size is within
    /// tolerance of the current one and every source timestamp matches.
    fn cache_valid(&self, author_dir: &Path, desired: usize, timestamps: &[u64]) -> bool {
        let raw = match fs::read_to_string(author_dir.join(META_FILE)) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        let mut lines = raw.lines();
        let stored_size: usize = match lines.next().and_then(|l| l.parse().ok()) {
            Some(s) => s,
            None => return false,
        };
        let stored_ts: Vec<u64> = match lines.next() {
            Some(line) => {
                let parsed: Option<Vec<u64>> =
                    line.split(' ').map(|p| p.parse().ok()).collect();
                match parsed {
                    Some(ts) => ts,
                    None => return false,
                }
            }
            None => return false,
        };
        let drift = (stored_size as f64 - desired as f64).abs();
        if drift > desired as f64 * self.config.tolerance {
            return false;
        }
        stored_ts == timestamps
    }

    fn load_chunks(&self, author: &str, author_dir: &Path) -> Result<Vec<Document>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(author_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "txt").unwrap_or(false))
            .collect();
        paths.sort();
        let chunks = paths
            .into_iter()
            .enumerate()
            .map(|(n, path)| Document::from_path(author, &format!("chunk-{:04}", n + 1), path))
            .collect();
        Ok(chunks)
    }
}

/// Sequence of chunk sizes for `total` words.
///
/// Full chunks of exactly `desired` words; the final partial chunk is kept
/// only when it reaches `desired * (1 - tolerance)` words, with that
/// threshold never dropping below `min_size`. Otherwise the remainder is
/// dropped.
fn chunk_sizes(total: usize, desired: usize, min_size: usize, tolerance: f64) -> Vec<usize> {
    let full = total / desired;
    let remainder = total % desired;
    let mut sizes = vec![desired; full];
    let threshold = ((desired as f64) * (1.0 - tolerance)).ceil() as usize;
    if remainder >= threshold.max(min_size.min(desired)) && remainder > 0 {
        sizes.push(remainder);
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_size: usize, tolerance: f64) -> ChunkerConfig {
        ChunkerConfig {
            min_size,
            default_size: 10,
            max_size: None,
            tolerance,
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn partial_chunk_within_tolerance_is_kept() {
        // threshold = ceil(10 * 0.8) = 8
        assert_eq!(chunk_sizes(18, 10, 2, 0.2), vec![10, 8]);
    }

    #[test]
    fn partial_chunk_below_tolerance_is_dropped() {
        assert_eq!(chunk_sizes(17, 10, 2, 0.2), vec![10]);
    }

    #[test]
    fn exact_multiple_has_no_partial() {
        assert_eq!(chunk_sizes(20, 10, 2, 0.2), vec![10, 10]);
    }

    #[test]
    fn chunk_corpus_rewrites_training_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = Chunker::new(dir.path().join("chunks"), config(2, 0.2));

        let mut training = vec![
            Document::from_text("alice", "b-second", &words(8)),
            Document::from_text("alice", "a-first", &words(10)),
        ];
        let test = vec![Document::from_text("query", "q", &words(10))];
        chunker.chunk_corpus(&mut training, &test).unwrap();

        // 18 words at target 10 with tolerance 0.2: one 10-word + one 8-word chunk
        assert_eq!(training.len(), 2);
        assert_eq!(training[0].title, "chunk-0001");
        assert_eq!(training[0].text().unwrap().split_whitespace().count(), 10);
        assert_eq!(training[1].text().unwrap().split_whitespace().count(), 8);

        // concatenation follows title order, not insertion order
        assert!(training[0].text().unwrap().starts_with("w0 "));
    }

    #[test]
    fn remainder_outside_tolerance_yields_single_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = Chunker::new(dir.path().join("chunks"), config(2, 0.2));
        let mut training = vec![Document::from_text("alice", "only", &words(17))];
        let test = vec![Document::from_text("query", "q", &words(10))];
        chunker.chunk_corpus(&mut training, &test).unwrap();
        assert_eq!(training.len(), 1);
        assert_eq!(training[0].text().unwrap().split_whitespace().count(), 10);
    }

    #[test]
    fn cache_validity_follows_size_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = Chunker::new(dir.path().join("chunks"), config(2, 0.05));
        let author_dir = dir.path().join("chunks").join("alice");
        fs::create_dir_all(&author_dir).unwrap();
        fs::write(author_dir.join(META_FILE), "490\n100 200\n").unwrap();

        // 490 vs 500 is a 2% drift: valid
        assert!(chunker.cache_valid(&author_dir, 500, &[100, 200]));
        // 440 vs 500 is a 12% drift: invalid
        fs::write(author_dir.join(META_FILE), "440\n100 200\n").unwrap();
        assert!(!chunker.cache_valid(&author_dir, 500, &[100, 200]));
        // timestamp mismatch invalidates regardless of size
        fs::write(author_dir.join(META_FILE), "500\n100 999\n").unwrap();
        assert!(!chunker.cache_valid(&author_dir, 500, &[100, 200]));
    }

    #[test]
    fn rechunking_uses_originals_not_previous_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = Chunker::new(dir.path().join("chunks"), config(2, 0.2));

        let original = Document::from_text("alice", "src", &words(20));
        let mut training = vec![original];
        let test10 = vec![Document::from_text("q", "q", &words(10))];
        chunker.chunk_corpus(&mut training, &test10).unwrap();
        assert_eq!(training.len(), 2);

        // new target size: chunks must be recut from the 20-word original,
        // not from the two 10-word chunks
        let test5 = vec![Document::from_text("q", "q", &words(5))];
        chunker.chunk_corpus(&mut training, &test5).unwrap();
        assert_eq!(training.len(), 4);
        for chunk in &training {
            assert_eq!(chunk.text().unwrap().split_whitespace().count(), 5);
        }
    }

    #[test]
    fn author_with_too_few_words_keeps_originals() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = Chunker::new(dir.path().join("chunks"), config(2, 0.05));
        let mut training = vec![Document::from_text("alice", "tiny", &words(3))];
        let test = vec![Document::from_text("q", "q", &words(10))];
        chunker.chunk_corpus(&mut training, &test).unwrap();
        assert_eq!(training.len(), 1);
        assert_eq!(training[0].title, "tiny");
    }
}
