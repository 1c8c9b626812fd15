use ndarray::prelude::*;

use crate::cluster::linalg::{center_columns, row_norms};

const MAX_POWER_ITER: usize = 500;
const POWER_TOL: f64 = 1e-12;

/// Project rows onto their leading principal components.
///
/// Components come from power iteration on `XᵀX` with deflation, so no LAPACK
/// is needed. Each component's sign is fixed so its largest loading is
/// positive, which keeps the output deterministic. Components beyond the rank
/// of the data are zero.
#[tracing::instrument(name = "Performing PCA", level = "debug", skip(x), fields(shape = ?x.dim()))]
pub fn pca_reduce(x: &Array2<f64>, n_components: usize) -> Array2<f64> {
    let (n_samples, _) = x.dim();
    let (mut residual, _) = center_columns(x);
    let mut projected = Array2::<f64>::zeros((n_samples, n_components));

    for c in 0..n_components {
        let Some(v) = leading_direction(&residual) else {
            break;
        };
        let scores = residual.dot(&v); // (n_samples,)
        projected.column_mut(c).assign(&scores);
        // Deflate: X ← X - (Xv)vᵀ
        let outer = scores
            .view()
            .insert_axis(Axis(1))
            .dot(&v.view().insert_axis(Axis(0)));
        residual -= &outer;
    }
    projected
}

fn leading_direction(x: &Array2<f64>) -> Option<Array1<f64>> {
    let norms = row_norms(x, true);
    let (start, &largest) = norms
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if largest <= f64::EPSILON {
        return None;
    }
    let mut v = x.row(start).to_owned();
    v /= largest.sqrt();

    for _ in 0..MAX_POWER_ITER {
        let mut next = x.t().dot(&x.dot(&v));
        let norm = next.dot(&next).sqrt();
        if norm <= f64::EPSILON {
            return None;
        }
        next /= norm;
        let delta = &next - &v;
        v = next;
        if delta.dot(&delta) < POWER_TOL {
            break;
        }
    }

    let pivot = v
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);
    if pivot < 0.0 {
        v.mapv_inplace(|e| -e);
    }
    Some(v)
}
