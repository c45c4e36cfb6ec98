use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the extraction pipeline.
///
/// A cache miss is not represented here: lookups return `Option` and fall
/// back to fresh extraction as ordinary control flow.
#[derive(Debug, Error)]
pub enum Error {
    /// A cache record existed but could not be read or parsed.
    /// Recovered locally: the record is deleted and regenerated.
    #[error("corrupt cache record for {author}/{title}: {reason}")]
    CacheCorrupt {
        author: String,
        title: String,
        reason: String,
    },

    /// Raw extraction or normalization failed for one document.
    #[error("extraction failed for {author}/{title}: {reason}")]
    Extraction {
        author: String,
        title: String,
        reason: String,
    },

    /// Re-chunking an author's corpus failed; the caller falls back to the
    /// unchunked documents.
    #[error("chunking failed for author {author}: {reason}")]
    Chunking { author: String, reason: String },

    /// A test document's feature index disagrees with the training
    /// vocabulary. This is an invariant violation, not a recoverable
    /// condition: misaligned vectors must never be produced silently.
    #[error("vocabulary mismatch: {0}")]
    VocabularyMismatch(String),

    /// The feature-set spec is malformed or references an unknown
    /// normalizer, extractor or culling policy.
    #[error("invalid feature-set spec: {0}")]
    Spec(String),

    /// Worker pool construction failed.
    #[error("worker pool: {0}")]
    Pool(String),

    /// Snapshot (de)serialization failed.
    #[error("serialization: {0}")]
    Serialize(String),

    /// The run was cancelled cooperatively between documents.
    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn extraction(author: &str, title: &str, reason: impl Into<String>) -> Self {
        Error::Extraction {
            author: author.to_string(),
            title: title.to_string(),
            reason: reason.into(),
        }
    }

    pub fn chunking(author: &str, reason: impl Into<String>) -> Self {
        Error::Chunking {
            author: author.to_string(),
            reason: reason.into(),
        }
    }

    pub fn cache_corrupt(author: &str, title: &str, reason: impl Into<String>) -> Self {
        Error::CacheCorrupt {
            author: author.to_string(),
            title: title.to_string(),
            reason: reason.into(),
        }
    }
}
