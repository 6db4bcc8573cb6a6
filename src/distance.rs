//! Exact Euclidean scoring of a query against a batch of stored embeddings.

use ndarray::{ArrayView1, Zip};
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Non-negative; smaller means more similar.
pub type Distance = f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("candidate {index} has {actual} dimensions, query has {expected}")]
pub struct DimensionMismatch {
    pub index: usize,
    pub expected: usize,
    pub actual: usize,
}

/// L2 distance. Squares are summed in f64 in index order so the result is
/// reproducible run to run.
pub fn euclidean(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Result<Distance, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            index: 0,
            expected: a.len(),
            actual: b.len(),
        });
    }
    let sum = Zip::from(&a).and(&b).fold(0.0f64, |acc, &x, &y| {
        let d = x as f64 - y as f64;
        acc + d * d
    });
    Ok(sum.sqrt() as Distance)
}

fn score<C: AsRef<[f32]>>(
    query: ArrayView1<f32>,
    index: usize,
    candidate: &C,
) -> Result<Distance, DimensionMismatch> {
    euclidean(query, ArrayView1::from(candidate.as_ref()))
        .map_err(|e| DimensionMismatch { index, ..e })
}

/// Distances from `query` to every candidate, index-aligned with `candidates`.
///
/// Fails on the first candidate whose dimensionality differs from the query.
#[cfg(not(feature = "parallel"))]
pub fn distances<C>(
    query: ArrayView1<f32>,
    candidates: &[C],
) -> Result<Vec<Distance>, DimensionMismatch>
where
    C: AsRef<[f32]> + Sync,
{
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| score(query, i, c))
        .collect()
}

/// Distances from `query` to every candidate, index-aligned with `candidates`.
///
/// Candidates are scored on the rayon pool. When several candidates have the
/// wrong dimensionality, any one of them may be reported.
#[cfg(feature = "parallel")]
pub fn distances<C>(
    query: ArrayView1<f32>,
    candidates: &[C],
) -> Result<Vec<Distance>, DimensionMismatch>
where
    C: AsRef<[f32]> + Sync,
{
    candidates
        .par_iter()
        .enumerate()
        .map(|(i, c)| score(query, i, c))
        .collect()
}
