use ndarray::prelude::*;
use ndarray::Data;

use crate::cluster::linalg::row_norms;

/// Pairwise distances between the rows of `a` and the rows of `b`.
///
/// Uses `|a|² - 2a·b + |b|²`; precomputed squared norms may be passed in.
pub fn euclidean_distances<S1, S2>(
    a: &ArrayBase<S1, Ix2>,               // a = (n_a, n_features)
    b: &ArrayBase<S2, Ix2>,               // b = (n_b, n_features)
    a_norm_squared: Option<&Array1<f64>>, // (n_a,)
    b_norm_squared: Option<&Array1<f64>>, // (n_b,)
    squared: bool,
) -> Array2<f64>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let aa = a_norm_squared
        .cloned()
        .unwrap_or_else(|| row_norms(a, true));
    let bb = b_norm_squared
        .cloned()
        .unwrap_or_else(|| row_norms(b, true));

    let mut distances: Array2<f64> = -2.0 * a.dot(&b.t()); // (n_a, n_b)
    distances += &aa.insert_axis(Axis(1));
    distances += &bb;
    distances.mapv_inplace(|d| d.max(0.0));
    if !squared {
        distances.mapv_inplace(f64::sqrt);
    }
    distances
}

/// `np.searchsorted(np.cumsum(weights * values), targets)` with the result
/// clipped to the last valid index.
pub fn searchsorted_cumsum(
    weights: &Array1<f64>, // (n_samples,)
    values: &Array1<f64>,  // (n_samples,)
    targets: &Array1<f64>, // (n_trials,)
) -> Vec<usize> {
    let mut acc = 0.0;
    let cumsum: Vec<f64> = weights
        .iter()
        .zip(values)
        .map(|(w, v)| {
            acc += w * v;
            acc
        })
        .collect();
    let last = cumsum.len().saturating_sub(1);
    targets
        .iter()
        .map(|t| cumsum.partition_point(|c| c < t).min(last))
        .collect()
}

/// Index of the smallest value; the first one wins ties.
pub fn argmin<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Option<usize> {
    values
        .into_iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1).then(a.0.cmp(&b.0)))
        .map(|(idx, _)| idx)
}
