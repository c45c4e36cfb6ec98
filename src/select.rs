//! Information-gain feature selection.
//!
//! Ranks columns by how well they discriminate the author label and prunes
//! the matrix down to the best `keep_n`, renumbering the surviving ranking
//! so it stays valid against the pruned matrix.

use std::collections::HashMap;

use ahash::RandomState;

use crate::matrix::FeatureMatrix;

/// (score, column index) pairs sorted descending by score.
pub type Ranking = Vec<(f64, usize)>;

/// Shannon entropy of a label distribution given as counts.
fn entropy(counts: &HashMap<&str, usize, RandomState>, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let mut h = 0.0;
    for &count in counts.values() {
        if count == 0 {
            continue;
        }
        let p = count as f64 / total as f64;
        h -= p * p.log2();
    }
    h
}

/// Score every column by information gain against the author label.
///
/// Each column is discretized at its corpus mean into two bins; the score
/// is `H(author) - Σ p(bin) · H(author | bin)`. Ties are broken by
/// ascending column index so the ordering is total and reproducible.
pub fn rank(matrix: &FeatureMatrix) -> Ranking {
    let rows: Vec<(&str, &crate::matrix::SparseVec<f64>)> = matrix
        .rows()
        .map(|(author, _, vec)| (author, vec))
        .collect();
    let n = rows.len();
    if n == 0 {
        return Vec::new();
    }

    let mut class_counts: HashMap<&str, usize, RandomState> =
        HashMap::with_hasher(RandomState::new());
    for &(author, _) in &rows {
        *class_counts.entry(author).or_insert(0) += 1;
    }
    let class_entropy = entropy(&class_counts, n);

    let mut ranking: Ranking = Vec::with_capacity(matrix.num_columns());
    for column in 0..matrix.num_columns() {
        let mean = rows
            .iter()
            .map(|(_, vec)| vec.get(column as u32))
            .sum::<f64>()
            / n as f64;

        let mut above: HashMap<&str, usize, RandomState> =
            HashMap::with_hasher(RandomState::new());
        let mut below: HashMap<&str, usize, RandomState> =
            HashMap::with_hasher(RandomState::new());
        let mut above_n = 0usize;
        for &(author, vec) in &rows {
            if vec.get(column as u32) > mean {
                *above.entry(author).or_insert(0) += 1;
                above_n += 1;
            } else {
                *below.entry(author).or_insert(0) += 1;
            }
        }
        let below_n = n - above_n;
        let conditional = (above_n as f64 / n as f64) * entropy(&above, above_n)
            + (below_n as f64 / n as f64) * entropy(&below, below_n);
        ranking.push((class_entropy - conditional, column));
    }

    ranking.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    ranking
}

/// Keep the first `keep_n` ranked columns and remove the rest from the
/// matrix.
///
/// Columns are removed in descending index order so removal never shifts
/// an index that is still pending. The returned ranking is renumbered
/// against the pruned matrix: every kept entry's index drops by the number
/// of removed columns below it.
pub fn apply(ranking: &Ranking, matrix: &mut FeatureMatrix, keep_n: usize) -> Ranking {
    let keep_n = keep_n.min(ranking.len());
    let kept = &ranking[..keep_n];
    let mut removed: Vec<usize> = ranking[keep_n..].iter().map(|(_, c)| *c).collect();
    removed.sort_unstable_by(|a, b| b.cmp(a));

    for &column in &removed {
        matrix.remove_column(column);
    }

    kept.iter()
        .map(|&(score, column)| {
            let shift = removed.iter().filter(|&&r| r < column).count();
            (score, column - shift)
        })
        .collect()
}
