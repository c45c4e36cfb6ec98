/// This crate is an authorship feature-extraction pipeline: it turns a
/// corpus of text documents, grouped by author, into numeric feature
/// vectors suitable for classification.
///
/// The pipeline stages, in data-flow order:
/// - A declarative [`FeatureSetSpec`] names each feature's normalizer
///   chain, raw extractor, histogram flag and normalization baseline.
/// - The [`Chunker`] optionally recuts long training corpora into chunks
///   matching the test document's length.
/// - The [`Orchestrator`] partitions documents across a worker pool and
///   drives extraction, consulting the [`DocumentCache`] first.
/// - The vocabulary builder culls and unions the observations into a
///   fixed, ordered [`Vocabulary`].
/// - The [`Vectorizer`] produces baseline-normalized sparse vectors, and
///   information-gain selection can prune the resulting [`FeatureMatrix`].
///
/// Classification itself is out of scope: the finished matrix is handed
/// to an external [`Analyzer`].
pub mod cache;
pub mod chunker;
pub mod document;
pub mod error;
pub mod extract;
pub mod matrix;
pub mod observation;
pub mod select;
pub mod spec;
pub mod vectorize;
pub mod vocab;

/// Feature-Set Spec
/// A named, ordered list of feature definitions, loadable from JSON.
/// Carries a structural identity hash over extractor/normalizer/baseline
/// configuration (culling excluded) that keys cache invalidation.
pub use spec::{Baseline, FeatureDef, FeatureSetSpec, StepSpec};

/// Collaborator registry
/// Maps the string identifiers used in spec files to normalizer,
/// extractor and culling-policy constructors, resolved once at load time.
pub use spec::registry::{CullingPolicy, RawEvents, RawExtractor, Registry, TextNormalizer};

/// Document and normalization baselines
/// A document is identified by (author, title, path); its content loads
/// lazily. Baseline counts divide feature values during normalization.
pub use document::{count_baselines, BaselineCounts, Document};

/// Observation Sets
/// Raw per-document, per-definition output: a multiset of event tokens
/// for histogram definitions, a native numeric value for scalar ones.
pub use observation::{DocObservations, ObservationSet};

/// Document Cache
/// Content-addressed store of extracted observations with per-document
/// freshness checks and whole-subtree invalidation on spec change.
pub use cache::DocumentCache;

/// Chunker
/// Recuts each author's concatenated training text into chunks whose
/// word count matches the test document, with its own cache.
pub use chunker::{Chunker, ChunkerConfig};

/// Extraction Orchestrator
/// Order-preserving parallel extraction with cooperative cancellation.
pub use extract::{CancelToken, Orchestrator};

/// Vocabulary
/// The fixed, ordered token set per feature definition that defines the
/// permanent column layout, plus the culling entry point.
pub use vocab::{cull, Vocabulary};

/// Vectorizer and Feature Matrix
/// Sparse vectors aligned against the vocabulary, normalized per
/// document, collected into the author/title matrix handed to analyzers.
pub use matrix::{Analyzer, FeatureMatrix, SparseVec};
pub use vectorize::Vectorizer;

/// Error taxonomy
pub use error::{Error, Result};
