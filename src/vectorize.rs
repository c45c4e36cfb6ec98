//! Conversion of observation sets into aligned sparse vectors.

use tracing::warn;

use crate::document::BaselineCounts;
use crate::error::{Error, Result};
use crate::matrix::{FeatureMatrix, SparseVec};
use crate::observation::{DocObservations, ObservationSet};
use crate::spec::{Baseline, FeatureSetSpec};
use crate::vocab::Vocabulary;

/// Vectorizes documents against a fixed vocabulary.
///
/// The vocabulary's column ordering is permanent; training and test
/// vectors produced through the same `Vectorizer` are dimensionally
/// aligned by construction.
pub struct Vectorizer<'a> {
    vocab: &'a Vocabulary,
    spec: &'a FeatureSetSpec,
}

impl<'a> Vectorizer<'a> {
    pub fn new(vocab: &'a Vocabulary, spec: &'a FeatureSetSpec) -> Self {
        Self { vocab, spec }
    }

    /// Convert one training document's observations into a sparse vector.
    ///
    /// Every histogram token must be present in the vocabulary: the
    /// vocabulary was built from this same corpus, so an unknown token is
    /// an invariant violation and fails loudly.
    pub fn vectorize_training(&self, doc: &DocObservations) -> Result<SparseVec<f64>> {
        let mut vec = SparseVec::new(self.vocab.num_columns() as u32);
        for (slot, set) in doc.sets.iter().enumerate() {
            match set {
                ObservationSet::Histogram { events, .. } => {
                    for event in events {
                        let column = self.vocab.column(slot, event).ok_or_else(|| {
                            Error::VocabularyMismatch(format!(
                                "token '{}' of {}/{} missing from training vocabulary",
                                event, doc.author, doc.title
                            ))
                        })?;
                        vec.add(column, 1.0);
                    }
                }
                ObservationSet::Scalar { value, .. } => {
                    let column = self.vocab.span(slot).start;
                    vec.set(column, *value);
                }
            }
        }
        vec.shrink_to_fit();
        Ok(vec)
    }

    /// Drop every histogram token a test document carries that the
    /// training vocabulary never saw.
    ///
    /// Test vectors may never gain dimensions unseen at training time;
    /// scalar slots pass through unchanged.
    pub fn restrict_to_training(&self, docs: &mut [DocObservations]) {
        for doc in docs.iter_mut() {
            for (slot, set) in doc.sets.iter_mut().enumerate() {
                if let ObservationSet::Histogram { events, .. } = set {
                    events.retain(|e| self.vocab.contains(slot, e));
                }
            }
        }
    }

    /// Vectorize a test document: restriction must already have run, so a
    /// leftover unknown token still fails as a vocabulary mismatch.
    pub fn vectorize_test(&self, doc: &DocObservations) -> Result<SparseVec<f64>> {
        self.vectorize_training(doc)
    }

    /// Normalize a vector in place by the document's baselines.
    ///
    /// Each definition's contiguous column span is divided by that
    /// definition's baseline count times its scale factor. The baseline
    /// choice is per definition, never global; `Baseline::None` spans are
    /// left untouched.
    pub fn normalize(&self, vec: &mut SparseVec<f64>, baselines: &BaselineCounts) {
        for (slot, def) in self.spec.features.iter().enumerate() {
            let count = match def.baseline {
                Baseline::Sentences => baselines.sentences,
                Baseline::Words => baselines.words,
                Baseline::Chars => baselines.chars,
                Baseline::Letters => baselines.letters,
                Baseline::None => continue,
            };
            let divisor = count as f64 * def.factor;
            if divisor == 0.0 {
                warn!(
                    feature = %def.name,
                    "zero normalization baseline, leaving span unnormalized"
                );
                continue;
            }
            vec.scale_span(self.vocab.span(slot), divisor);
        }
    }

    /// Build the feature matrix for a corpus.
    ///
    /// Vectorizes every document and normalizes it by its own baselines.
    pub fn build_matrix(&self, docs: &[DocObservations]) -> Result<FeatureMatrix> {
        let mut matrix = FeatureMatrix::new(self.vocab.labels().to_vec());
        for doc in docs {
            let mut vec = self.vectorize_training(doc)?;
            self.normalize(&mut vec, &doc.baselines);
            matrix.insert(&doc.author, &doc.title, vec);
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BaselineCounts;
    use crate::spec::{FeatureDef, StepSpec};

    fn spec() -> FeatureSetSpec {
        FeatureSetSpec::new("set")
            .with_feature(FeatureDef::histogram(
                "words",
                StepSpec::new("words"),
                Baseline::Words,
            ))
            .with_feature(
                FeatureDef::scalar("awl", StepSpec::new("avg-word-length"), Baseline::None)
                    .with_factor(2.0),
            )
    }

    fn doc(author: &str, events: &[&str], value: f64, words: u64) -> DocObservations {
        let mut obs = DocObservations::new(
            author,
            "t",
            BaselineCounts {
                sentences: 1,
                words,
                chars: 50,
                letters: 40,
            },
        );
        obs.sets.push(ObservationSet::Histogram {
            id: "words".into(),
            events: events.iter().map(|s| s.to_string()).collect(),
        });
        obs.sets.push(ObservationSet::Scalar {
            id: "awl".into(),
            value,
        });
        obs
    }

    #[test]
    fn histogram_counts_multiplicity() {
        let docs = vec![doc("a", &["x", "y", "x"], 3.0, 3)];
        let spec = spec();
        let vocab = Vocabulary::build(&docs, &spec);
        let v = Vectorizer::new(&vocab, &spec)
            .vectorize_training(&docs[0])
            .unwrap();
        assert_eq!(v.get(vocab.column(0, "x").unwrap()), 2.0);
        assert_eq!(v.get(vocab.column(0, "y").unwrap()), 1.0);
        // scalar lands on its placeholder column
        assert_eq!(v.get(vocab.span(1).start), 3.0);
    }

    #[test]
    fn training_token_and_test_token_share_a_column() {
        let train = vec![doc("a", &["x", "y"], 0.0, 2), doc("b", &["z"], 0.0, 1)];
        let spec = spec();
        let vocab = Vocabulary::build(&train, &spec);
        let vectorizer = Vectorizer::new(&vocab, &spec);

        let mut test = vec![doc("c", &["z", "unseen", "x"], 0.0, 3)];
        vectorizer.restrict_to_training(&mut test);
        let v = vectorizer.vectorize_test(&test[0]).unwrap();

        let z_col = vocab.column(0, "z").unwrap();
        assert_eq!(v.get(z_col), 1.0);
        assert_eq!(v.get(vocab.column(0, "x").unwrap()), 1.0);
        // the unseen token contributed no dimension at all
        assert_eq!(v.dim() as usize, vocab.num_columns());
        assert_eq!(v.nnz(), 2);
    }

    #[test]
    fn unknown_training_token_is_a_loud_failure() {
        let train = vec![doc("a", &["x"], 0.0, 1)];
        let spec = spec();
        let vocab = Vocabulary::build(&train, &spec);
        let vectorizer = Vectorizer::new(&vocab, &spec);

        let stray = doc("b", &["nope"], 0.0, 1);
        let err = vectorizer.vectorize_training(&stray).unwrap_err();
        assert!(matches!(err, Error::VocabularyMismatch(_)));
    }

    #[test]
    fn normalization_divides_by_baseline_times_factor() {
        let docs = vec![doc("a", &["x", "x", "y"], 6.0, 3)];
        let spec = spec();
        let vocab = Vocabulary::build(&docs, &spec);
        let vectorizer = Vectorizer::new(&vocab, &spec);

        let mut v = vectorizer.vectorize_training(&docs[0]).unwrap();
        vectorizer.normalize(&mut v, &docs[0].baselines);

        // histogram span: word baseline 3, factor 1
        assert_eq!(v.get(vocab.column(0, "x").unwrap()), 2.0 / 3.0);
        // scalar span: Baseline::None leaves the value untouched
        assert_eq!(v.get(vocab.span(1).start), 6.0);
    }
}
