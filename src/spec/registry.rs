//! String-id → constructor registry for the pluggable collaborators.
//!
//! Spec files name their normalizer chain, raw extractor and culling policy
//! by string identifier. All identifiers resolve exactly once, at spec-load
//! time; an unknown id fails the load instead of surfacing mid-run.

use std::collections::HashMap;

use ahash::RandomState;

use crate::error::{Error, Result};
use crate::observation::ObservationSet;
use crate::spec::{FeatureDef, FeatureSetSpec, StepSpec};

/// Output of a raw extractor: event tokens for histogram definitions, a
/// native numeric value for scalar definitions.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvents {
    Events(Vec<String>),
    Value(f64),
}

/// A text-rewriting step applied before the extractor runs.
pub trait TextNormalizer: Send + Sync {
    fn apply(&self, text: &str) -> String;
}

/// Generates raw observations from normalized text.
pub trait RawExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Result<RawEvents>;
}

/// Cross-corpus pruning of one feature definition's observation sets.
///
/// Receives one set per training document and must return the same number
/// of sets in the same document order. Identifiers may be dropped; the
/// vocabulary builder restores them by position.
pub trait CullingPolicy: Send + Sync {
    fn cull(&self, sets: Vec<ObservationSet>) -> Vec<ObservationSet>;
}

type NormalizerCtor = fn(&StepSpec) -> Result<Box<dyn TextNormalizer>>;
type ExtractorCtor = fn(&StepSpec) -> Result<Box<dyn RawExtractor>>;
type CullerCtor = fn(&StepSpec) -> Result<Box<dyn CullingPolicy>>;

/// Maps string identifiers to collaborator constructors.
///
/// `Registry::builtin()` registers the bundled collaborators; callers may
/// register their own before resolving a spec.
pub struct Registry {
    normalizers: HashMap<String, NormalizerCtor, RandomState>,
    extractors: HashMap<String, ExtractorCtor, RandomState>,
    cullers: HashMap<String, CullerCtor, RandomState>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            normalizers: HashMap::with_hasher(RandomState::new()),
            extractors: HashMap::with_hasher(RandomState::new()),
            cullers: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Registry pre-populated with the bundled collaborators.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        reg.register_normalizer("lowercase", |_| Ok(Box::new(Lowercase)));
        reg.register_normalizer("strip-punct", |_| Ok(Box::new(StripPunct)));
        reg.register_normalizer("strip-digits", |_| Ok(Box::new(StripDigits)));
        reg.register_normalizer("collapse-ws", |_| Ok(Box::new(CollapseWhitespace)));
        reg.register_extractor("words", |_| Ok(Box::new(WordNgrams { n: 1 })));
        reg.register_extractor("word-ngrams", |step| {
            Ok(Box::new(WordNgrams {
                n: usize_param(step, "n")?,
            }))
        });
        reg.register_extractor("char-ngrams", |step| {
            Ok(Box::new(CharNgrams {
                n: usize_param(step, "n")?,
            }))
        });
        reg.register_extractor("avg-word-length", |_| Ok(Box::new(AvgWordLength)));
        reg.register_extractor("unique-word-ratio", |_| Ok(Box::new(UniqueWordRatio)));
        reg.register_culler("none", |_| Ok(Box::new(NoCull)));
        reg.register_culler("min-occurrences", |step| {
            Ok(Box::new(MinOccurrences {
                min: usize_param(step, "k")? as u64,
            }))
        });
        reg.register_culler("top-k", |step| {
            Ok(Box::new(TopK {
                k: usize_param(step, "k")?,
            }))
        });
        reg
    }

    pub fn register_normalizer(&mut self, id: &str, ctor: NormalizerCtor) {
        self.normalizers.insert(id.to_string(), ctor);
    }

    pub fn register_extractor(&mut self, id: &str, ctor: ExtractorCtor) {
        self.extractors.insert(id.to_string(), ctor);
    }

    pub fn register_culler(&mut self, id: &str, ctor: CullerCtor) {
        self.cullers.insert(id.to_string(), ctor);
    }

    /// Resolve every identifier in the spec into live collaborators.
    ///
    /// Each call constructs fresh trait objects, so every worker thread can
    /// resolve its own structural clone without sharing state.
    pub fn resolve(&self, spec: &FeatureSetSpec) -> Result<ResolvedSpec> {
        if spec.features.is_empty() {
            return Err(Error::Spec(format!(
                "feature set '{}' defines no features",
                spec.name
            )));
        }
        let mut features = Vec::with_capacity(spec.features.len());
        for def in &spec.features {
            features.push(self.resolve_def(def)?);
        }
        Ok(ResolvedSpec {
            name: spec.name.clone(),
            hash: spec.structural_hash(),
            features,
        })
    }

    fn resolve_def(&self, def: &FeatureDef) -> Result<ResolvedFeature> {
        let mut normalizers = Vec::with_capacity(def.normalizers.len());
        for step in &def.normalizers {
            let ctor = self
                .normalizers
                .get(&step.id)
                .ok_or_else(|| Error::Spec(format!("unknown normalizer '{}'", step.id)))?;
            normalizers.push(ctor(step)?);
        }
        let ctor = self
            .extractors
            .get(&def.extractor.id)
            .ok_or_else(|| Error::Spec(format!("unknown extractor '{}'", def.extractor.id)))?;
        let extractor = ctor(&def.extractor)?;
        let culler = match &def.culler {
            Some(step) => {
                let ctor = self
                    .cullers
                    .get(&step.id)
                    .ok_or_else(|| Error::Spec(format!("unknown culling policy '{}'", step.id)))?;
                ctor(step)?
            }
            None => Box::new(NoCull) as Box<dyn CullingPolicy>,
        };
        Ok(ResolvedFeature {
            def: def.clone(),
            normalizers,
            extractor,
            culler,
        })
    }
}

fn usize_param(step: &StepSpec, key: &str) -> Result<usize> {
    let raw = step
        .param(key)
        .ok_or_else(|| Error::Spec(format!("'{}' requires parameter '{}'", step.id, key)))?;
    if raw < 1.0 || raw.fract() != 0.0 {
        return Err(Error::Spec(format!(
            "'{}' parameter '{}' must be a positive integer, got {}",
            step.id, key, raw
        )));
    }
    Ok(raw as usize)
}

/// One feature definition with its collaborators constructed.
pub struct ResolvedFeature {
    pub def: FeatureDef,
    pub normalizers: Vec<Box<dyn TextNormalizer>>,
    pub extractor: Box<dyn RawExtractor>,
    pub culler: Box<dyn CullingPolicy>,
}

impl ResolvedFeature {
    /// Run the normalizer chain over a document's text.
    pub fn normalize_text(&self, text: &str) -> String {
        let mut current = text.to_string();
        for step in &self.normalizers {
            current = step.apply(&current);
        }
        current
    }
}

/// A spec whose string identifiers have all been resolved.
pub struct ResolvedSpec {
    pub name: String,
    pub hash: String,
    pub features: Vec<ResolvedFeature>,
}

// ---------------------------------------------------------------------------
// built-in normalizers

struct Lowercase;
impl TextNormalizer for Lowercase {
    fn apply(&self, text: &str) -> String {
        text.to_lowercase()
    }
}

struct StripPunct;
impl TextNormalizer for StripPunct {
    fn apply(&self, text: &str) -> String {
        text.chars()
            .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
            .collect()
    }
}

struct StripDigits;
impl TextNormalizer for StripDigits {
    fn apply(&self, text: &str) -> String {
        text.chars().filter(|c| !c.is_ascii_digit()).collect()
    }
}

struct CollapseWhitespace;
impl TextNormalizer for CollapseWhitespace {
    fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut in_ws = true;
        for c in text.chars() {
            if c.is_whitespace() {
                if !in_ws {
                    out.push(' ');
                }
                in_ws = true;
            } else {
                out.push(c);
                in_ws = false;
            }
        }
        if out.ends_with(' ') {
            out.pop();
        }
        out
    }
}

// ---------------------------------------------------------------------------
// built-in extractors

struct WordNgrams {
    n: usize,
}

impl RawExtractor for WordNgrams {
    fn extract(&self, text: &str) -> Result<RawEvents> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() < self.n {
            return Ok(RawEvents::Events(Vec::new()));
        }
        let events = words
            .windows(self.n)
            .map(|w| w.join(" "))
            .collect::<Vec<String>>();
        Ok(RawEvents::Events(events))
    }
}

struct CharNgrams {
    n: usize,
}

impl RawExtractor for CharNgrams {
    fn extract(&self, text: &str) -> Result<RawEvents> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() < self.n {
            return Ok(RawEvents::Events(Vec::new()));
        }
        let events = chars
            .windows(self.n)
            .map(|w| w.iter().collect::<String>())
            .collect::<Vec<String>>();
        Ok(RawEvents::Events(events))
    }
}

struct AvgWordLength;
impl RawExtractor for AvgWordLength {
    fn extract(&self, text: &str) -> Result<RawEvents> {
        let mut total = 0usize;
        let mut count = 0usize;
        for word in text.split_whitespace() {
            total += word.chars().count();
            count += 1;
        }
        let avg = if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        };
        Ok(RawEvents::Value(avg))
    }
}

struct UniqueWordRatio;
impl RawExtractor for UniqueWordRatio {
    fn extract(&self, text: &str) -> Result<RawEvents> {
        use std::collections::HashSet;
        let mut seen: HashSet<&str, RandomState> = HashSet::with_hasher(RandomState::new());
        let mut count = 0usize;
        for word in text.split_whitespace() {
            seen.insert(word);
            count += 1;
        }
        let ratio = if count == 0 {
            0.0
        } else {
            seen.len() as f64 / count as f64
        };
        Ok(RawEvents::Value(ratio))
    }
}

// ---------------------------------------------------------------------------
// built-in culling policies

struct NoCull;
impl CullingPolicy for NoCull {
    fn cull(&self, sets: Vec<ObservationSet>) -> Vec<ObservationSet> {
        sets
    }
}

/// Drops tokens occurring fewer than `min` times across the whole corpus.
struct MinOccurrences {
    min: u64,
}

impl CullingPolicy for MinOccurrences {
    fn cull(&self, sets: Vec<ObservationSet>) -> Vec<ObservationSet> {
        let counts = corpus_counts(&sets);
        sets.into_iter()
            .map(|set| match set {
                ObservationSet::Histogram { id, events } => {
                    let kept = events
                        .into_iter()
                        .filter(|e| counts.get(e.as_str()).copied().unwrap_or(0) >= self.min)
                        .collect();
                    ObservationSet::Histogram { id, events: kept }
                }
                scalar => scalar,
            })
            .collect()
    }
}

/// Keeps only the `k` most frequent tokens across the whole corpus.
/// Ties resolve lexicographically so the outcome is deterministic.
struct TopK {
    k: usize,
}

impl CullingPolicy for TopK {
    fn cull(&self, sets: Vec<ObservationSet>) -> Vec<ObservationSet> {
        let counts = corpus_counts(&sets);
        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.k);
        let keep: std::collections::HashSet<String, RandomState> =
            ranked.into_iter().map(|(t, _)| t).collect();
        sets.into_iter()
            .map(|set| match set {
                ObservationSet::Histogram { id, events } => {
                    let kept = events
                        .into_iter()
                        .filter(|e| keep.contains(e.as_str()))
                        .collect();
                    ObservationSet::Histogram { id, events: kept }
                }
                scalar => scalar,
            })
            .collect()
    }
}

// Counts own their keys so the map outlives the sets it was built from.
fn corpus_counts(sets: &[ObservationSet]) -> HashMap<String, u64, RandomState> {
    let mut counts: HashMap<String, u64, RandomState> = HashMap::with_hasher(RandomState::new());
    for set in sets {
        if let ObservationSet::Histogram { events, .. } = set {
            for event in events {
                *counts.entry(event.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Baseline;

    fn hist(events: &[&str]) -> ObservationSet {
        ObservationSet::Histogram {
            id: "f".into(),
            events: events.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn word_ngrams_window_over_words() {
        let ex = WordNgrams { n: 2 };
        let out = ex.extract("a b c").unwrap();
        assert_eq!(
            out,
            RawEvents::Events(vec!["a b".to_string(), "b c".to_string()])
        );
    }

    #[test]
    fn char_ngrams_shorter_than_n_is_empty() {
        let ex = CharNgrams { n: 4 };
        assert_eq!(ex.extract("abc").unwrap(), RawEvents::Events(Vec::new()));
    }

    #[test]
    fn avg_word_length_on_empty_text_is_zero() {
        let ex = AvgWordLength;
        assert_eq!(ex.extract("").unwrap(), RawEvents::Value(0.0));
        assert_eq!(ex.extract("ab abcd").unwrap(), RawEvents::Value(3.0));
    }

    #[test]
    fn min_occurrences_drops_rare_tokens_corpus_wide() {
        let culler = MinOccurrences { min: 2 };
        let out = culler.cull(vec![hist(&["a", "b"]), hist(&["a", "c"])]);
        assert_eq!(out[0], hist(&["a"]));
        assert_eq!(out[1], hist(&["a"]));
    }

    #[test]
    fn cullers_filter_events_but_pass_scalars_through() {
        let scalar = ObservationSet::Scalar {
            id: "s".into(),
            value: 1.5,
        };
        let sets = vec![hist(&["a", "b", "a"]), scalar.clone(), hist(&["a"])];

        let by_min = MinOccurrences { min: 2 }.cull(sets.clone());
        assert_eq!(by_min[0], hist(&["a", "a"]));
        assert_eq!(by_min[1], scalar);
        assert_eq!(by_min[2], hist(&["a"]));

        let by_top = TopK { k: 1 }.cull(sets);
        assert_eq!(by_top[0], hist(&["a", "a"]));
        assert_eq!(by_top[1], scalar);
    }

    #[test]
    fn top_k_is_deterministic_under_ties() {
        let culler = TopK { k: 2 };
        let out = culler.cull(vec![hist(&["b", "a", "c"])]);
        // all counts tie at 1; lexicographic order keeps a and b
        assert_eq!(out[0], hist(&["b", "a"]));
    }

    #[test]
    fn unknown_extractor_fails_resolution() {
        let spec = FeatureSetSpec::new("s").with_feature(FeatureDef::histogram(
            "f",
            StepSpec::new("no-such-extractor"),
            Baseline::Words,
        ));
        let result = Registry::builtin().resolve(&spec);
        assert!(matches!(result, Err(Error::Spec(_))));
    }

    #[test]
    fn ngram_param_must_be_positive_integer() {
        let spec = FeatureSetSpec::new("s").with_feature(FeatureDef::histogram(
            "f",
            StepSpec::new("word-ngrams").with_param("n", 0.5),
            Baseline::Words,
        ));
        assert!(Registry::builtin().resolve(&spec).is_err());
    }

    #[test]
    fn normalizer_chain_applies_in_order() {
        let spec = FeatureSetSpec::new("s").with_feature(
            FeatureDef::histogram("f", StepSpec::new("words"), Baseline::Words)
                .with_normalizer(StepSpec::new("lowercase"))
                .with_normalizer(StepSpec::new("strip-punct"))
                .with_normalizer(StepSpec::new("collapse-ws")),
        );
        let resolved = Registry::builtin().resolve(&spec).unwrap();
        let text = resolved.features[0].normalize_text("Hello,  World!");
        assert_eq!(text, "hello world");
    }
}
