//! Sparse vectors and the author/document feature matrix.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use num::Num;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sparse vector stored as (column, value) pairs sorted by column.
///
/// `N` is the stored value type; the pipeline uses `f64` but the container
/// itself is generic over any numeric type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVec<N = f64>
where
    N: Num + Copy,
{
    entries: Vec<(u32, N)>,
    dim: u32,
}

impl<N> SparseVec<N>
where
    N: Num + Copy,
{
    pub fn new(dim: u32) -> Self {
        Self {
            entries: Vec::new(),
            dim,
        }
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Number of explicitly stored (non-zero) entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, column: u32) -> N {
        match self.entries.binary_search_by_key(&column, |(c, _)| *c) {
            Ok(pos) => self.entries[pos].1,
            Err(_) => N::zero(),
        }
    }

    pub fn set(&mut self, column: u32, value: N) {
        debug_assert!(column < self.dim);
        match self.entries.binary_search_by_key(&column, |(c, _)| *c) {
            Ok(pos) => {
                if value.is_zero() {
                    self.entries.remove(pos);
                } else {
                    self.entries[pos].1 = value;
                }
            }
            Err(pos) => {
                if !value.is_zero() {
                    self.entries.insert(pos, (column, value));
                }
            }
        }
    }

    pub fn add(&mut self, column: u32, delta: N) {
        let current = self.get(column);
        self.set(column, current + delta);
    }

    /// Iterate the stored entries in column order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, N)> + '_ {
        self.entries.iter().copied()
    }

    /// Remove one column and shift every higher column index down by one.
    pub fn remove_column(&mut self, column: u32) {
        debug_assert!(column < self.dim);
        self.entries.retain(|(c, _)| *c != column);
        for (c, _) in self.entries.iter_mut() {
            if *c > column {
                *c -= 1;
            }
        }
        self.dim -= 1;
    }

    /// Divide every stored value in `span` by `divisor`.
    pub fn scale_span(&mut self, span: std::ops::Range<u32>, divisor: N) {
        for (c, v) in self.entries.iter_mut() {
            if span.contains(c) {
                *v = *v / divisor;
            }
        }
    }

    pub fn shrink_to_fit(&mut self) {
        self.entries.shrink_to_fit();
    }
}

/// The final artifact: author → document title → sparse feature vector,
/// plus the flattened column labels ("DataMap").
///
/// Invariant: a column index refers to the same vocabulary entry for the
/// lifetime of a run. The only mutation after construction is column
/// removal by the feature selector, which renumbers consistently.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub docs: IndexMap<String, IndexMap<String, SparseVec<f64>>>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            docs: IndexMap::new(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_documents(&self) -> usize {
        self.docs.values().map(|by_title| by_title.len()).sum()
    }

    pub fn insert(&mut self, author: &str, title: &str, vec: SparseVec<f64>) {
        self.docs
            .entry(author.to_string())
            .or_default()
            .insert(title.to_string(), vec);
    }

    pub fn get(&self, author: &str, title: &str) -> Option<&SparseVec<f64>> {
        self.docs.get(author)?.get(title)
    }

    /// The class label set.
    pub fn authors(&self) -> impl Iterator<Item = &str> {
        self.docs.keys().map(|s| s.as_str())
    }

    /// Iterate (author, title, vector) rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str, &SparseVec<f64>)> {
        self.docs.iter().flat_map(|(author, by_title)| {
            by_title
                .iter()
                .map(move |(title, vec)| (author.as_str(), title.as_str(), vec))
        })
    }

    /// Remove one column from every vector and from the label table,
    /// shifting higher indices down.
    pub fn remove_column(&mut self, column: usize) {
        self.columns.remove(column);
        for by_title in self.docs.values_mut() {
            for vec in by_title.values_mut() {
                vec.remove_column(column as u32);
            }
        }
    }

    /// Persist a snapshot as CBOR.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = serde_cbor::to_vec(self).map_err(|e| Error::Serialize(e.to_string()))?;
        fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    /// Load a snapshot written by [`FeatureMatrix::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        serde_cbor::from_slice(&bytes).map_err(|e| Error::Serialize(e.to_string()))
    }
}

/// Seam for classification backends.
///
/// The pipeline hands over the finished matrix and never trains or
/// evaluates models itself.
pub trait Analyzer {
    type Output;

    fn analyze(&self, matrix: &FeatureMatrix) -> Result<Self::Output>;
}
