use serde::{Deserialize, Serialize};

use crate::document::BaselineCounts;

/// Raw output of one feature definition applied to one document.
///
/// Histogram definitions produce a multiset of event tokens in generation
/// order; scalar definitions produce a single numeric value carried natively
/// rather than encoded inside a token string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationSet {
    Histogram { id: String, events: Vec<String> },
    Scalar { id: String, value: f64 },
}

impl ObservationSet {
    /// Identifier of the owning feature definition.
    pub fn id(&self) -> &str {
        match self {
            ObservationSet::Histogram { id, .. } => id,
            ObservationSet::Scalar { id, .. } => id,
        }
    }

    /// Restore the owning feature definition's identifier.
    ///
    /// Culling policies are free to drop identifiers; the vocabulary builder
    /// puts them back by position afterwards.
    pub fn set_id(&mut self, new_id: &str) {
        match self {
            ObservationSet::Histogram { id, .. } => *id = new_id.to_string(),
            ObservationSet::Scalar { id, .. } => *id = new_id.to_string(),
        }
    }

    /// Number of events (histogram) or 1 (scalar).
    pub fn len(&self) -> usize {
        match self {
            ObservationSet::Histogram { events, .. } => events.len(),
            ObservationSet::Scalar { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ObservationSet::Histogram { events, .. } if events.is_empty())
    }
}

/// Everything extracted from one document: one observation set per feature
/// definition, in spec order, plus the synthetic metadata observation
/// (author, title and the four normalization baselines).
///
/// The metadata lives outside `sets` so culling can never touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocObservations {
    pub author: String,
    pub title: String,
    pub sets: Vec<ObservationSet>,
    pub baselines: BaselineCounts,
}

impl DocObservations {
    pub fn new(author: &str, title: &str, baselines: BaselineCounts) -> Self {
        Self {
            author: author.to_string(),
            title: title.to_string(),
            sets: Vec::new(),
            baselines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_id_restores_identifier() {
        let mut set = ObservationSet::Histogram {
            id: String::new(),
            events: vec!["a".into()],
        };
        set.set_id("words");
        assert_eq!(set.id(), "words");

        let mut scalar = ObservationSet::Scalar {
            id: "x".into(),
            value: 1.5,
        };
        scalar.set_id("avg-word-length");
        assert_eq!(scalar.id(), "avg-word-length");
    }

    #[test]
    fn scalar_is_never_empty() {
        let scalar = ObservationSet::Scalar {
            id: "s".into(),
            value: 0.0,
        };
        assert!(!scalar.is_empty());
        assert_eq!(scalar.len(), 1);
    }
}
