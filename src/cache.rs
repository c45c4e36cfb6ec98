//! Content-addressed store for extracted observations.
//!
//! Layout: `<root>/<feature-set-name>/<author>/<title>`, with a `spec.hash`
//! marker per feature-set subtree. A record is served only when the stored
//! canonical path and last-modified timestamp still match the document on
//! disk; any read or parse failure deletes the record and counts as a miss.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::document::{BaselineCounts, Document};
use crate::error::{Error, Result};
use crate::observation::{DocObservations, ObservationSet};
use crate::spec::FeatureSetSpec;

const SPEC_MARKER: &str = "spec.hash";
const SECTION_DELIMITER: &str = "%";

/// On-disk cache of per-document observation sets.
///
/// One instance per run, passed explicitly to the orchestrator. Within a
/// run each document's record is owned by exactly one worker, so no file
/// locking is needed; sharing one cache root across concurrent runs is
/// unsupported.
#[derive(Debug, Clone)]
pub struct DocumentCache {
    root: PathBuf,
}

impl DocumentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Global invalidation: compare the spec's structural hash against the
    /// stored marker for its name. On mismatch the whole subtree is deleted
    /// and the marker rewritten, so no observation computed under a stale
    /// configuration is ever served.
    pub fn prepare(&self, spec: &FeatureSetSpec) -> Result<()> {
        let set_dir = self.set_dir(&spec.name);
        let marker = set_dir.join(SPEC_MARKER);
        let current = spec.structural_hash();
        match fs::read_to_string(&marker) {
            Ok(stored) if stored.trim() == current => return Ok(()),
            Ok(stored) => {
                warn!(
                    feature_set = %spec.name,
                    stored = %stored.trim(),
                    current = %current,
                    "feature-set configuration changed, invalidating cache subtree"
                );
                fs::remove_dir_all(&set_dir)?;
            }
            Err(_) => {
                // no marker: wipe anything that may predate marker files
                if set_dir.exists() {
                    fs::remove_dir_all(&set_dir)?;
                }
            }
        }
        fs::create_dir_all(&set_dir)?;
        fs::write(&marker, &current)?;
        Ok(())
    }

    /// Look up the cached observations for one document.
    ///
    /// Returns `None` on any miss: no record, path moved, file touched, or
    /// an unreadable record (which is deleted so it will be regenerated).
    pub fn lookup(&self, spec: &FeatureSetSpec, doc: &Document) -> Option<DocObservations> {
        let record = self.record_path(&spec.name, &doc.author, &doc.title);
        if !record.is_file() {
            return None;
        }
        let canonical = match doc.canonical_path()? {
            Ok(p) => p,
            Err(_) => return None,
        };
        let modified = match doc.modified_millis()? {
            Ok(m) => m,
            Err(_) => return None,
        };
        match self.read_record(&record, spec, doc) {
            Ok((stored_path, stored_modified, obs)) => {
                if stored_path != canonical.to_string_lossy().as_ref() {
                    debug!(author = %doc.author, title = %doc.title, "cache miss: path changed");
                    return None;
                }
                if stored_modified != modified {
                    debug!(author = %doc.author, title = %doc.title, "cache miss: document modified");
                    return None;
                }
                Some(obs)
            }
            Err(err) => {
                warn!(
                    author = %doc.author,
                    title = %doc.title,
                    error = %err,
                    "deleting unreadable cache record"
                );
                let _ = fs::remove_file(&record);
                None
            }
        }
    }

    /// Persist one document's observations.
    ///
    /// The record is written to a temp file and renamed into place, so a
    /// cancelled run can never leave a half-written record behind.
    pub fn store(
        &self,
        spec: &FeatureSetSpec,
        doc: &Document,
        obs: &DocObservations,
    ) -> Result<()> {
        let canonical = match doc.canonical_path() {
            Some(p) => p?,
            // in-memory documents have no stable address to cache under
            None => return Ok(()),
        };
        let modified = match doc.modified_millis() {
            Some(m) => m?,
            None => return Ok(()),
        };
        let author_dir = self.set_dir(&spec.name).join(sanitize(&doc.author));
        fs::create_dir_all(&author_dir)?;

        let mut body = String::new();
        body.push_str(&canonical.to_string_lossy());
        body.push('\n');
        body.push_str(&modified.to_string());
        body.push('\n');
        let b = &obs.baselines;
        body.push_str(&format!(
            "@ {} {} {} {}\n",
            b.sentences, b.words, b.chars, b.letters
        ));
        for set in &obs.sets {
            body.push_str(set.id());
            body.push('\n');
            match set {
                ObservationSet::Histogram { events, .. } => {
                    for event in events {
                        body.push('+');
                        body.push_str(&escape(event));
                        body.push('\n');
                    }
                }
                ObservationSet::Scalar { value, .. } => {
                    body.push('#');
                    body.push_str(&value.to_string());
                    body.push('\n');
                }
            }
            body.push_str(SECTION_DELIMITER);
            body.push('\n');
        }

        let record = self.record_path(&spec.name, &doc.author, &doc.title);
        let tmp = author_dir.join(format!(".tmp-{}", sanitize(&doc.title)));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &record)?;
        Ok(())
    }

    fn read_record(
        &self,
        record: &Path,
        spec: &FeatureSetSpec,
        doc: &Document,
    ) -> Result<(String, u64, DocObservations)> {
        let corrupt =
            |reason: &str| Error::cache_corrupt(&doc.author, &doc.title, reason.to_string());
        let raw = fs::read_to_string(record)?;
        let mut lines = raw.lines();
        let stored_path = lines.next().ok_or_else(|| corrupt("missing path line"))?;
        let stored_modified: u64 = lines
            .next()
            .ok_or_else(|| corrupt("missing timestamp line"))?
            .parse()
            .map_err(|_| corrupt("bad timestamp line"))?;
        let baselines = parse_baselines(
            lines
                .next()
                .ok_or_else(|| corrupt("missing baseline line"))?,
        )
        .ok_or_else(|| corrupt("bad baseline line"))?;

        let mut obs = DocObservations::new(&doc.author, &doc.title, baselines);
        for def in &spec.features {
            let id = lines.next().ok_or_else(|| corrupt("missing section"))?;
            if id != def.name {
                return Err(corrupt("identifier out of order"));
            }
            if def.histogram {
                let mut events = Vec::new();
                loop {
                    let line = lines.next().ok_or_else(|| corrupt("unterminated section"))?;
                    if line == SECTION_DELIMITER {
                        break;
                    }
                    let token = line
                        .strip_prefix('+')
                        .ok_or_else(|| corrupt("bad event line"))?;
                    events.push(unescape(token));
                }
                obs.sets.push(ObservationSet::Histogram {
                    id: def.name.clone(),
                    events,
                });
            } else {
                let line = lines.next().ok_or_else(|| corrupt("unterminated section"))?;
                let value: f64 = line
                    .strip_prefix('#')
                    .ok_or_else(|| corrupt("bad value line"))?
                    .parse()
                    .map_err(|_| corrupt("bad value line"))?;
                if lines.next() != Some(SECTION_DELIMITER) {
                    return Err(corrupt("unterminated section"));
                }
                obs.sets.push(ObservationSet::Scalar {
                    id: def.name.clone(),
                    value,
                });
            }
        }
        if lines.next().is_some() {
            return Err(corrupt("trailing data"));
        }
        Ok((stored_path.to_string(), stored_modified, obs))
    }

    fn set_dir(&self, set_name: &str) -> PathBuf {
        self.root.join(sanitize(set_name))
    }

    fn record_path(&self, set_name: &str, author: &str, title: &str) -> PathBuf {
        self.set_dir(set_name)
            .join(sanitize(author))
            .join(sanitize(title))
    }
}

fn parse_baselines(line: &str) -> Option<BaselineCounts> {
    let rest = line.strip_prefix("@ ")?;
    let mut parts = rest.split(' ');
    let baselines = BaselineCounts {
        sentences: parts.next()?.parse().ok()?,
        words: parts.next()?.parse().ok()?,
        chars: parts.next()?.parse().ok()?,
        letters: parts.next()?.parse().ok()?,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(baselines)
}

/// Make a name safe to use as a file-system component.
///
/// A name that needed no rewriting maps to itself. Anything rewritten gets
/// a short digest suffix of the raw name, so two distinct names can never
/// collapse onto the same path component.
pub(crate) fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned == name {
        return cleaned;
    }
    let digest = Sha256::digest(name.as_bytes());
    format!(
        "{}-{:02x}{:02x}{:02x}{:02x}",
        cleaned, digest[0], digest[1], digest[2], digest[3]
    )
}

/// Event tokens may contain newlines (character n-grams over raw text);
/// escape them so the record stays line-oriented.
fn escape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::count_baselines;
    use crate::spec::{Baseline, FeatureDef, FeatureSetSpec, StepSpec};

    fn spec() -> FeatureSetSpec {
        FeatureSetSpec::new("set")
            .with_feature(FeatureDef::histogram(
                "words",
                StepSpec::new("words"),
                Baseline::Words,
            ))
            .with_feature(FeatureDef::scalar(
                "awl",
                StepSpec::new("avg-word-length"),
                Baseline::None,
            ))
    }

    fn write_doc(dir: &Path, author: &str, title: &str, text: &str) -> Document {
        let path = dir.join(format!("{}-{}.txt", author, title));
        fs::write(&path, text).unwrap();
        Document::from_path(author, title, path)
    }

    fn observations(doc: &Document, events: &[&str], value: f64) -> DocObservations {
        let mut obs = DocObservations::new(
            &doc.author,
            &doc.title,
            count_baselines(doc.text().unwrap()),
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
    fn store_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().join("cache"));
        let spec = spec();
        cache.prepare(&spec).unwrap();

        let doc = write_doc(dir.path(), "alice", "letter", "some text here.");
        let obs = observations(&doc, &["some", "text", "here."], 4.2);
        cache.store(&spec, &doc, &obs).unwrap();

        let hit = cache.lookup(&spec, &doc).expect("expected cache hit");
        assert_eq!(hit, obs);
    }

    #[test]
    fn touching_a_document_invalidates_only_its_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().join("cache"));
        let spec = spec();
        cache.prepare(&spec).unwrap();

        let doc_a = write_doc(dir.path(), "alice", "a", "first text.");
        let doc_b = write_doc(dir.path(), "alice", "b", "second text.");
        cache
            .store(&spec, &doc_a, &observations(&doc_a, &["first"], 1.0))
            .unwrap();
        cache
            .store(&spec, &doc_b, &observations(&doc_b, &["second"], 2.0))
            .unwrap();

        // rewrite doc_a with a different mtime
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(doc_a.path().unwrap(), "changed text.").unwrap();

        assert!(cache.lookup(&spec, &doc_a).is_none());
        assert!(cache.lookup(&spec, &doc_b).is_some());
    }

    #[test]
    fn spec_hash_change_wipes_the_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().join("cache"));
        let spec_v1 = spec();
        cache.prepare(&spec_v1).unwrap();

        let doc = write_doc(dir.path(), "alice", "a", "text one two.");
        cache
            .store(&spec_v1, &doc, &observations(&doc, &["text"], 1.0))
            .unwrap();
        assert!(cache.lookup(&spec_v1, &doc).is_some());

        // same name, different baseline: structurally a different spec
        let mut spec_v2 = spec();
        spec_v2.features[0].baseline = Baseline::Sentences;
        cache.prepare(&spec_v2).unwrap();
        assert!(cache.lookup(&spec_v2, &doc).is_none());

        // culling-only change keeps the subtree
        cache
            .store(&spec_v2, &doc, &observations(&doc, &["text"], 1.0))
            .unwrap();
        let mut spec_v3 = spec_v2.clone();
        spec_v3.features[0].culler = Some(StepSpec::new("top-k").with_param("k", 9.0));
        cache.prepare(&spec_v3).unwrap();
        assert!(cache.lookup(&spec_v3, &doc).is_some());
    }

    #[test]
    fn corrupt_record_is_deleted_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().join("cache"));
        let spec = spec();
        cache.prepare(&spec).unwrap();

        let doc = write_doc(dir.path(), "alice", "a", "text.");
        cache
            .store(&spec, &doc, &observations(&doc, &["text."], 1.0))
            .unwrap();

        let record = cache.record_path(&spec.name, "alice", "a");
        fs::write(&record, "not a record").unwrap();
        assert!(cache.lookup(&spec, &doc).is_none());
        assert!(!record.exists(), "corrupt record should be deleted");
    }

    #[test]
    fn similar_titles_keep_separate_records() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().join("cache"));
        let spec = spec();
        cache.prepare(&spec).unwrap();

        // both titles sanitize to the same cleaned component
        let doc_a = write_doc(dir.path(), "alice", "a b", "first text.");
        let doc_b = write_doc(dir.path(), "alice", "a_b", "second text.");
        let obs_a = observations(&doc_a, &["first"], 1.0);
        let obs_b = observations(&doc_b, &["second"], 2.0);
        cache.store(&spec, &doc_a, &obs_a).unwrap();
        cache.store(&spec, &doc_b, &obs_b).unwrap();

        assert_eq!(cache.lookup(&spec, &doc_a).unwrap(), obs_a);
        assert_eq!(cache.lookup(&spec, &doc_b).unwrap(), obs_b);
    }

    #[test]
    fn sanitize_never_collapses_distinct_names() {
        assert_eq!(sanitize("plain-name.txt"), "plain-name.txt");
        assert_ne!(sanitize("a b"), sanitize("a_b"));
        assert_ne!(sanitize("a b"), sanitize("a?b"));
    }

    #[test]
    fn tokens_with_newlines_survive_the_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().join("cache"));
        let spec = spec();
        cache.prepare(&spec).unwrap();

        let doc = write_doc(dir.path(), "alice", "a", "line one\nline two.");
        let obs = observations(&doc, &["e\no", "a\\b", "plain"], 0.5);
        cache.store(&spec, &doc, &obs).unwrap();
        assert_eq!(cache.lookup(&spec, &doc).unwrap(), obs);
    }
}
