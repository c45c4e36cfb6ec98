//! Culling bookkeeping and vocabulary construction.
//!
//! Culling delegates to the per-definition policies; this module's own job
//! is invariants: metadata never passes through a culling policy, every
//! identifier is restored by position afterwards, and the vocabulary's
//! column ordering is fixed once built.

use std::ops::Range;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observation::{DocObservations, ObservationSet};
use crate::spec::registry::ResolvedSpec;
use crate::spec::FeatureSetSpec;

/// Placeholder vocabulary entry for scalar feature definitions.
pub const SCALAR_SLOT: &str = "<value>";

/// Apply each feature definition's culling policy across the whole corpus.
///
/// Policies see only the observation sets for their own definition slot.
/// Per-document metadata (author, title, baselines) lives outside the sets
/// and is untouched by construction; identifiers dropped by a policy are
/// restored by position before the sets are written back.
pub fn cull(docs: &mut [DocObservations], resolved: &ResolvedSpec) -> Result<()> {
    for (slot, feature) in resolved.features.iter().enumerate() {
        let mut column: Vec<ObservationSet> = Vec::with_capacity(docs.len());
        for doc in docs.iter() {
            let set = doc.sets.get(slot).ok_or_else(|| {
                Error::Spec(format!(
                    "document {}/{} is missing observation slot {}",
                    doc.author, doc.title, slot
                ))
            })?;
            column.push(set.clone());
        }
        let mut culled = feature.culler.cull(column);
        if culled.len() != docs.len() {
            return Err(Error::Spec(format!(
                "culling policy for '{}' returned {} sets for {} documents",
                feature.def.name,
                culled.len(),
                docs.len()
            )));
        }
        for (doc, set) in docs.iter_mut().zip(culled.iter_mut()) {
            set.set_id(&feature.def.name);
            doc.sets[slot] = set.clone();
        }
    }
    Ok(())
}

/// Per-definition token vocabulary with the flattened column layout.
///
/// Once built, the column index of a token never changes for the lifetime
/// of a run; test vectors are aligned against the same table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    /// First-seen ordered token set per feature definition.
    tokens: Vec<IndexSet<String>>,
    /// Definition index → `[start, end)` column range, precomputed at
    /// build time so spans are never re-derived from labels.
    spans: Vec<Range<u32>>,
    /// Flattened `definition/token` labels in column order.
    labels: Vec<String>,
}

impl Vocabulary {
    /// Build the vocabulary from the culled training corpus.
    ///
    /// Histogram definitions accumulate the ordered union of distinct
    /// tokens in first-seen order across all documents; scalar definitions
    /// occupy a single placeholder column.
    pub fn build(docs: &[DocObservations], spec: &FeatureSetSpec) -> Vocabulary {
        let mut tokens: Vec<IndexSet<String>> = Vec::with_capacity(spec.features.len());
        for (slot, def) in spec.features.iter().enumerate() {
            let mut set: IndexSet<String> = IndexSet::new();
            if def.histogram {
                for doc in docs {
                    if let Some(ObservationSet::Histogram { events, .. }) = doc.sets.get(slot) {
                        for event in events {
                            if !set.contains(event.as_str()) {
                                set.insert(event.clone());
                            }
                        }
                    }
                }
            } else {
                set.insert(SCALAR_SLOT.to_string());
            }
            tokens.push(set);
        }

        let mut spans = Vec::with_capacity(tokens.len());
        let mut labels = Vec::new();
        let mut start = 0u32;
        for (def, set) in spec.features.iter().zip(&tokens) {
            let end = start + set.len() as u32;
            spans.push(start..end);
            for token in set {
                labels.push(format!("{}/{}", def.name, token));
            }
            start = end;
        }

        Vocabulary {
            tokens,
            spans,
            labels,
        }
    }

    /// Total number of columns.
    pub fn num_columns(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Column range of one feature definition.
    pub fn span(&self, slot: usize) -> Range<u32> {
        self.spans[slot].clone()
    }

    pub fn num_definitions(&self) -> usize {
        self.spans.len()
    }

    /// Absolute column index of a token within a definition's span.
    pub fn column(&self, slot: usize, token: &str) -> Option<u32> {
        let local = self.tokens[slot].get_index_of(token)? as u32;
        Some(self.spans[slot].start + local)
    }

    /// Whether a definition's vocabulary contains a token.
    pub fn contains(&self, slot: usize, token: &str) -> bool {
        self.tokens[slot].contains(token)
    }

    /// Column label, `definition-name/token`.
    pub fn label(&self, column: u32) -> Option<&str> {
        self.labels.get(column as usize).map(|s| s.as_str())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
