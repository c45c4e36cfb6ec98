pub mod registry;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Per-document count a feature definition's values are normalized by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Baseline {
    Sentences,
    Words,
    Chars,
    Letters,
    /// No normalization; values pass through untouched.
    None,
}

/// One step of a spec: a registry identifier plus numeric parameters.
///
/// Parameters are kept in a `BTreeMap` so their iteration order, and hence
/// the structural hash, is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,
}

impl StepSpec {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<f64> {
        self.params.get(key).copied()
    }
}

fn default_factor() -> f64 {
    1.0
}

fn is_default_factor(f: &f64) -> bool {
    *f == 1.0
}

/// One named rule for deriving a signal from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    /// true: values are a multiset of discrete tokens.
    /// false: a single numeric scalar.
    pub histogram: bool,
    /// Text normalizers applied in order before the extractor runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalizers: Vec<StepSpec>,
    pub extractor: StepSpec,
    pub baseline: Baseline,
    #[serde(default = "default_factor", skip_serializing_if = "is_default_factor")]
    pub factor: f64,
    /// Cross-corpus culling policy. Applied after caching, so it is
    /// deliberately excluded from the structural identity hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culler: Option<StepSpec>,
}

impl FeatureDef {
    pub fn histogram(name: &str, extractor: StepSpec, baseline: Baseline) -> Self {
        Self {
            name: name.to_string(),
            histogram: true,
            normalizers: Vec::new(),
            extractor,
            baseline,
            factor: 1.0,
            culler: None,
        }
    }

    pub fn scalar(name: &str, extractor: StepSpec, baseline: Baseline) -> Self {
        Self {
            name: name.to_string(),
            histogram: false,
            normalizers: Vec::new(),
            extractor,
            baseline,
            factor: 1.0,
            culler: None,
        }
    }

    pub fn with_normalizer(mut self, step: StepSpec) -> Self {
        self.normalizers.push(step);
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_culler(mut self, step: StepSpec) -> Self {
        self.culler = Some(step);
        self
    }
}

/// A named, ordered list of feature definitions.
///
/// Loaded or constructed once per run and immutable thereafter. Worker
/// threads receive independent structural clones, never shared aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSetSpec {
    pub name: String,
    pub features: Vec<FeatureDef>,
}

impl FeatureSetSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            features: Vec::new(),
        }
    }

    pub fn with_feature(mut self, def: FeatureDef) -> Self {
        self.features.push(def);
        self
    }

    /// Load a spec from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| Error::Spec(e.to_string()))
    }

    /// Save the spec as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| Error::Spec(e.to_string()))?;
        fs::write(path.as_ref(), raw)?;
        Ok(())
    }

    /// A genuine deep copy for handing to a worker thread.
    ///
    /// Derived `Clone` already copies every field by value; this alias only
    /// names the intent at call sites.
    pub fn structural_clone(&self) -> Self {
        self.clone()
    }

    /// Structural identity hash over extractor, normalizer and baseline
    /// configuration.
    ///
    /// Culling policy is excluded: culling runs after caching, so two specs
    /// that differ only in culling may share cached observations.
    pub fn structural_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.features.len() as u64).to_le_bytes());
        for def in &self.features {
            hash_str(&mut hasher, &def.name);
            hasher.update([def.histogram as u8]);
            hasher.update((def.normalizers.len() as u64).to_le_bytes());
            for step in &def.normalizers {
                hash_step(&mut hasher, step);
            }
            hash_step(&mut hasher, &def.extractor);
            hasher.update([baseline_tag(def.baseline)]);
            hasher.update(def.factor.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest {
            let _ = write!(hex, "{:02x}", byte);
        }
        hex
    }
}

fn baseline_tag(b: Baseline) -> u8 {
    match b {
        Baseline::Sentences => 0,
        Baseline::Words => 1,
        Baseline::Chars => 2,
        Baseline::Letters => 3,
        Baseline::None => 4,
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_step(hasher: &mut Sha256, step: &StepSpec) {
    hash_str(hasher, &step.id);
    hasher.update((step.params.len() as u64).to_le_bytes());
    // BTreeMap iterates in key order, so the digest is stable
    for (key, value) in &step.params {
        hash_str(hasher, key);
        hasher.update(value.to_le_bytes());
    }
}
