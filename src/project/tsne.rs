use ndarray::prelude::*;
use tracing::{debug, info_span, trace};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

use super::pca::pca_reduce;
use crate::cluster::kmeans::euclidean_distances;

const EARLY_EXAGGERATION: f64 = 12.0;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const ENTROPY_TOL: f64 = 1e-5;
const MAX_BINARY_STEPS: usize = 100;
const INIT_STD: f64 = 1e-4;

/// Neighbourhood-preserving 2D embedding, initialised from PCA.
///
/// Runs on the full pairwise matrix, so cost grows with the square of the
/// number of rows. No randomness is involved: the same input always yields
/// the same layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Tsne {
    pub perplexity: f64,
    pub n_iter: usize,
}

impl Default for Tsne {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            n_iter: 500,
        }
    }
}

impl Tsne {
    pub fn new(perplexity: f64, n_iter: usize) -> Self {
        Self {
            perplexity,
            n_iter,
        }
    }

    /// Perplexity actually used; it cannot exceed what `n` rows support.
    pub fn effective_perplexity(&self, n: usize) -> f64 {
        let cap = (n.saturating_sub(1) as f64 / 3.0).max(1.0);
        self.perplexity.min(cap)
    }

    #[tracing::instrument(name = "Running t-SNE", level = "info", skip(self, x), fields(n = x.nrows()))]
    pub fn fit_transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        if n < 2 {
            return Array2::zeros((n, 2));
        }
        let perplexity = self.effective_perplexity(n);
        let distances = euclidean_distances(x, x, None, None, true);
        let p = joint_probabilities(&distances, perplexity);
        debug!(perplexity, "Computed joint probabilities");

        let mut y = initial_layout(x);
        let mut gains = Array2::<f64>::ones((n, 2));
        let mut velocity = Array2::<f64>::zeros((n, 2));
        let learning_rate = (n as f64 / EARLY_EXAGGERATION / 4.0).max(50.0);
        let exaggeration_iter = (self.n_iter / 4).min(250);

        let span = info_span!("t-SNE iterations");
        span.pb_set_length(self.n_iter as u64);
        span.pb_set_message("Laying out...");
        span.pb_set_finish_message("Layout complete");
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            span.pb_set_style(&style);
        }
        let _enter = span.enter();

        for iter in 0..self.n_iter {
            let (exaggeration, momentum) = if iter < exaggeration_iter {
                (EARLY_EXAGGERATION, INITIAL_MOMENTUM)
            } else {
                (1.0, FINAL_MOMENTUM)
            };
            let grad = gradient(&p, &y, exaggeration);

            azip!((g in &mut gains, &d in &grad, &v in &velocity) {
                *g = if (d > 0.0) != (v > 0.0) { *g + 0.2 } else { (*g * 0.8).max(MIN_GAIN) };
            });
            azip!((v in &mut velocity, &g in &gains, &d in &grad) {
                *v = momentum * *v - learning_rate * g * d;
            });
            y += &velocity;
            if let Some(mean) = y.mean_axis(Axis(0)) {
                y -= &mean;
            }
            if iter % 50 == 0 {
                trace!(iter, "t-SNE step");
            }
            span.pb_inc(1);
        }
        y
    }
}

/// PCA coordinates scaled so the first axis has a tiny standard deviation.
fn initial_layout(x: &Array2<f64>) -> Array2<f64> {
    let mut y = pca_reduce(x, 2);
    let std = y.column(0).std(0.0);
    if std > 0.0 {
        y *= INIT_STD / std;
    } else {
        // Degenerate input: spread points on a small deterministic circle.
        let n = y.nrows() as f64;
        for (i, mut row) in y.rows_mut().into_iter().enumerate() {
            let angle = std::f64::consts::TAU * i as f64 / n;
            row[0] = INIT_STD * angle.cos();
            row[1] = INIT_STD * angle.sin();
        }
    }
    y
}

/// Symmetric affinities `P` with each row calibrated to the target perplexity.
fn joint_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distances.nrows();
    let target_entropy = perplexity.ln();
    let mut conditional = Array2::<f64>::zeros((n, n));

    for (i, mut row) in conditional.rows_mut().into_iter().enumerate() {
        let d = distances.row(i);
        let mut beta = 1.0;
        let (mut beta_min, mut beta_max) = (f64::NEG_INFINITY, f64::INFINITY);
        for _ in 0..MAX_BINARY_STEPS {
            let entropy = conditional_row(d, i, beta, &mut row);
            let diff = entropy - target_entropy;
            if diff.abs() < ENTROPY_TOL {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
            } else {
                beta_max = beta;
                beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
            }
        }
    }

    let mut p = &conditional + &conditional.t();
    let total = p.sum().max(f64::MIN_POSITIVE);
    p.mapv_inplace(|v| (v / total).max(1e-12));
    p.diag_mut().fill(0.0);
    p
}

/// Fill `row` with `p(j|i)` for precision `beta`; returns the row's entropy.
fn conditional_row(d: ArrayView1<f64>, i: usize, beta: f64, row: &mut ArrayViewMut1<f64>) -> f64 {
    // Shift by the smallest off-diagonal distance to avoid underflow.
    let shift = d
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, &v)| v)
        .fold(f64::INFINITY, f64::min);
    for (j, p) in row.iter_mut().enumerate() {
        *p = if j == i { 0.0 } else { (-(d[j] - shift) * beta).exp() };
    }
    let sum = row.sum();
    if sum <= 0.0 {
        return 0.0;
    }
    *row /= sum;
    // H = log(sum) + beta * E[d - shift]
    let expected: f64 = row
        .iter()
        .zip(d.iter())
        .map(|(&p, &dj)| p * (dj - shift))
        .sum();
    sum.ln() + beta * expected
}

/// KL(P‖Q) gradient for the Student-t kernel.
fn gradient(p: &Array2<f64>, y: &Array2<f64>, exaggeration: f64) -> Array2<f64> {
    let n = y.nrows();
    let mut num = euclidean_distances(y, y, None, None, true);
    num.mapv_inplace(|d| 1.0 / (1.0 + d));
    num.diag_mut().fill(0.0);
    let sum_q = num.sum().max(f64::MIN_POSITIVE);

    let mut grad = Array2::<f64>::zeros((n, 2));
    for i in 0..n {
        let yi = y.row(i);
        let mut gi = grad.row_mut(i);
        for j in 0..n {
            if i == j {
                continue;
            }
            let w = num[(i, j)];
            let mult = (exaggeration * p[(i, j)] - w / sum_q) * w;
            gi[0] += mult * (yi[0] - y[(j, 0)]);
            gi[1] += mult * (yi[1] - y[(j, 1)]);
        }
    }
    grad *= 4.0;
    grad
}
