use ndarray::prelude::*;
use ndarray::Data;

/// Euclidean norm of every row, optionally left squared.
pub fn row_norms<S>(x: &ArrayBase<S, Ix2>, squared: bool) -> Array1<f64>
where
    S: Data<Elem = f64>,
{
    let sum = x.map_axis(Axis(1), |row| row.dot(&row));
    if squared { sum } else { sum.sqrt() }
}

/// Subtract the column means; returns the centred copy and the means.
pub fn center_columns(x: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    (x - &mean, mean)
}

/// Mean of the per-feature variances, the scale k-means tolerances are relative to.
pub fn mean_variance(x: &Array2<f64>) -> f64 {
    if x.nrows() == 0 {
        return 0.0;
    }
    x.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}
