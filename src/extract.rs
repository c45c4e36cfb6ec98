//! Parallel extraction of observation sets.
//!
//! Documents are split into contiguous slices, one per worker, and mapped
//! on a dedicated rayon pool sized `min(thread_count, document_count)`.
//! Slices are reassembled by index, so the output order matches the input
//! order regardless of worker count or completion order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use crate::cache::DocumentCache;
use crate::document::{count_baselines, Document};
use crate::error::{Error, Result};
use crate::observation::{DocObservations, ObservationSet};
use crate::spec::registry::{RawEvents, Registry, ResolvedFeature, ResolvedSpec};
use crate::spec::FeatureSetSpec;

/// Cooperative cancellation flag, checked between documents.
///
/// Workers are never terminated forcibly; a cancelled run finishes the
/// document in flight (cache writes stay atomic) and then returns
/// [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Drives raw extraction over a document list.
///
/// Holds no global state: the cache, registry and cancellation token are
/// all plain values owned by the caller.
pub struct Orchestrator<'a> {
    registry: &'a Registry,
    cache: Option<&'a DocumentCache>,
    thread_count: usize,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a Registry, thread_count: usize) -> Self {
        Self {
            registry,
            cache: None,
            thread_count: thread_count.max(1),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cache(mut self, cache: &'a DocumentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Extract observation sets for every document, order-preserving.
    ///
    /// A document whose extractor fails is logged and omitted; a document
    /// whose text cannot be read at all fails the run, because vocabulary
    /// alignment needs every document's normalization baselines.
    pub fn extract_all(
        &self,
        docs: &[Document],
        spec: &FeatureSetSpec,
    ) -> Result<Vec<DocObservations>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(cache) = self.cache {
            cache.prepare(spec)?;
        }

        let workers = self.thread_count.min(docs.len());
        let slices = partition(docs, workers);
        debug!(
            documents = docs.len(),
            workers,
            "starting extraction run"
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;

        // collect() preserves slice order, which restores document order
        let per_slice: Vec<Vec<DocObservations>> = pool.install(|| {
            slices
                .into_par_iter()
                .map(|slice| self.extract_slice(slice, spec))
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(per_slice.into_iter().flatten().collect())
    }

    /// One worker's share: consult the cache, fall back to raw extraction,
    /// write results back. The spec is cloned per worker, never aliased.
    fn extract_slice(
        &self,
        slice: &[Document],
        shared_spec: &FeatureSetSpec,
    ) -> Result<Vec<DocObservations>> {
        let spec = shared_spec.structural_clone();
        let resolved = self.registry.resolve(&spec)?;

        let mut results = Vec::with_capacity(slice.len());
        for doc in slice {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(cache) = self.cache {
                if let Some(hit) = cache.lookup(&spec, doc) {
                    results.push(hit);
                    continue;
                }
            }
            match extract_document(doc, &resolved) {
                Ok(obs) => {
                    if let Some(cache) = self.cache {
                        if let Err(err) = cache.store(&spec, doc, &obs) {
                            warn!(
                                author = %doc.author,
                                title = %doc.title,
                                error = %err,
                                "failed to write cache record"
                            );
                        }
                    }
                    results.push(obs);
                }
                // baseline computation failed: fatal for the whole run
                Err(err @ Error::Io(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        author = %doc.author,
                        title = %doc.title,
                        error = %err,
                        "skipping document"
                    );
                }
            }
        }
        Ok(results)
    }
}

/// Split `docs` into `workers` contiguous slices; the last slice absorbs
/// the remainder.
fn partition(docs: &[Document], workers: usize) -> Vec<&[Document]> {
    let base = docs.len() / workers;
    let mut slices = Vec::with_capacity(workers);
    let mut start = 0usize;
    for w in 0..workers {
        let end = if w == workers - 1 {
            docs.len()
        } else {
            start + base
        };
        slices.push(&docs[start..end]);
        start = end;
    }
    slices
}

/// Apply every feature definition to one document.
///
/// The normalizer chain runs first, then the raw extractor; every
/// observation set is tagged with its definition's name so namespaces stay
/// disjoint.
pub fn extract_document(doc: &Document, resolved: &ResolvedSpec) -> Result<DocObservations> {
    // corpus-wide metadata pass: an unreadable document is fatal upstream
    let text = doc.text()?;
    let mut obs = DocObservations::new(&doc.author, &doc.title, count_baselines(text));
    for feature in &resolved.features {
        obs.sets.push(extract_one(doc, text, feature)?);
    }
    Ok(obs)
}

fn extract_one(doc: &Document, text: &str, feature: &ResolvedFeature) -> Result<ObservationSet> {
    let normalized = feature.normalize_text(text);
    let raw = feature.extractor.extract(&normalized).map_err(|e| {
        Error::extraction(&doc.author, &doc.title, e.to_string())
    })?;
    match (feature.def.histogram, raw) {
        (true, RawEvents::Events(events)) => Ok(ObservationSet::Histogram {
            id: feature.def.name.clone(),
            events,
        }),
        (false, RawEvents::Value(value)) => Ok(ObservationSet::Scalar {
            id: feature.def.name.clone(),
            value,
        }),
        (histogram, _) => Err(Error::extraction(
            &doc.author,
            &doc.title,
            format!(
                "extractor '{}' output does not match histogram={} for '{}'",
                feature.def.extractor.id, histogram, feature.def.name
            ),
        )),
    }
}
