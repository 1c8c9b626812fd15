mod lloyd;
mod utils;

use std::collections::HashSet;

use ndarray::prelude::*;
use ndarray_rand::RandomExt;
use ndarray_rand::rand::distr::StandardUniform;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{Rng, SeedableRng};
use tracing::{debug, info_span, trace, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

use self::lloyd::kmeans_single_lloyd;
pub use self::utils::euclidean_distances;
use crate::cluster::linalg::{center_columns, mean_variance, row_norms};
use crate::cluster::traits::Clusterer;
use crate::{AppError, AppResult};

static DEFAULT_N_INIT: usize = 1;
static DEFAULT_MAX_ITER: usize = 300;
static DEFAULT_TOLERANCE: f64 = 1e-4;
static DEFAULT_SEED: u64 = 42;

/// Pick `n_clusters` seeds with greedy k-means++.
///
/// Each step samples `2 + ln(k)` candidates proportionally to their weighted
/// squared distance to the nearest chosen center and keeps the candidate that
/// lowers the potential most.
fn kmeans_plus_plus<R: Rng>(
    x: &Array2<f64>,               // (n_samples, n_features)
    n_clusters: usize,
    sample_weight: &Array1<f64>,   // (n_samples,)
    x_squared_norms: &Array1<f64>, // (n_samples,)
    rng: &mut R,
) -> (Array2<f64>, Vec<usize>) {
    let (n_samples, n_features) = x.dim();
    let n_local_trials = 2 + (n_clusters as f64).ln() as usize;

    let mut centers = Array2::<f64>::zeros((n_clusters, n_features));
    let mut indices = Vec::with_capacity(n_clusters);

    let first = rng.random_range(0..n_samples);
    centers.row_mut(0).assign(&x.row(first));
    indices.push(first);

    let mut closest_dist_sq: Array1<f64> = utils::euclidean_distances(
        &x.slice(s![first..first + 1, ..]),
        x,
        None,
        Some(x_squared_norms),
        true,
    )
    .row(0)
    .to_owned(); // (n_samples,)
    let mut current_pot = closest_dist_sq.dot(sample_weight);

    for c in 1..n_clusters {
        let rand_vals =
            Array1::<f64>::random_using(n_local_trials, StandardUniform, rng) * current_pot;
        let candidate_ids = utils::searchsorted_cumsum(sample_weight, &closest_dist_sq, &rand_vals);

        let candidates = x.select(Axis(0), &candidate_ids);
        let mut distance_to_candidates = utils::euclidean_distances(
            &candidates,
            x,
            None,
            Some(x_squared_norms),
            true,
        ); // (n_trials, n_samples)
        for mut row in distance_to_candidates.rows_mut() {
            row.zip_mut_with(&closest_dist_sq, |d, &closest| *d = d.min(closest));
        }
        let candidates_pot = distance_to_candidates.dot(sample_weight); // (n_trials,)

        let best = utils::argmin(&candidates_pot).unwrap_or(0);
        current_pot = candidates_pot[best];
        closest_dist_sq = distance_to_candidates.row(best).to_owned();
        let chosen = candidate_ids[best];
        centers.row_mut(c).assign(&x.row(chosen));
        indices.push(chosen);
    }
    (centers, indices)
}

/// Result of fitting [`KMeans`].
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centers: Array2<f64>,
    pub inertia: f64,
    pub n_iter: usize,
}

impl KMeansFit {
    pub fn distinct_clusters(&self) -> usize {
        self.labels.iter().collect::<HashSet<_>>().len()
    }
}

/// Seeded k-means with k-means++ initialisation and Lloyd iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    pub k: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            n_init: DEFAULT_N_INIT,
            max_iter: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
        }
    }

    pub fn set_n_init(&mut self, n_init: usize) -> &mut Self {
        self.n_init = n_init;
        self
    }

    pub fn set_max_iter(&mut self, max_iter: usize) -> &mut Self {
        self.max_iter = max_iter;
        self
    }

    pub fn set_tolerance(&mut self, tolerance: f64) -> &mut Self {
        self.tolerance = tolerance;
        self
    }

    pub fn set_seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    /// Partition the rows of `x` into exactly `k` labelled groups.
    #[tracing::instrument(name = "Fitting k-means", level = "info", skip(self, x), fields(k = self.k, n = x.nrows()))]
    pub fn fit(&self, x: &Array2<f64>) -> AppResult<KMeansFit> {
        let n_samples = x.nrows();
        if self.k < 2 || self.k > n_samples {
            return Err(AppError::Configuration(format!(
                "cannot form {} clusters from {n_samples} items; the topic count must be between 2 and the number of items",
                self.k
            )));
        }

        let (x, mean) = center_columns(x);
        let x_squared_norms = row_norms(&x, true);
        let sample_weight = Array1::<f64>::ones(n_samples);
        let tol = mean_variance(&x) * self.tolerance;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let span = info_span!("k-means restarts");
        span.pb_set_length(self.n_init as u64);
        span.pb_set_message("Clustering...");
        span.pb_set_finish_message("Clustering complete");
        if let Ok(style) = ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len}") {
            span.pb_set_style(&style);
        }
        let _enter = span.enter();

        let mut best: Option<lloyd::LloydRun> = None;
        for run_idx in 0..self.n_init.max(1) {
            let (centers_init, seeds) =
                kmeans_plus_plus(&x, self.k, &sample_weight, &x_squared_norms, &mut rng);
            trace!(run_idx, ?seeds, "k-means++ seeds");
            let run = kmeans_single_lloyd(&x, &sample_weight, &centers_init, self.max_iter, tol);
            debug!(run_idx, inertia = run.inertia, n_iter = run.n_iter, "Lloyd run finished");
            if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
                best = Some(run);
            }
            span.pb_inc(1);
        }
        let best = best.ok_or_else(|| AppError::Configuration("n_init must be at least 1".into()))?;

        let fit = KMeansFit {
            labels: best.labels.to_vec(),
            centers: best.centers + &mean,
            inertia: best.inertia,
            n_iter: best.n_iter,
        };
        let distinct = fit.distinct_clusters();
        debug!(inertia = fit.inertia, n_iter = fit.n_iter, distinct, "k-means converged");
        trace!(centers = ?fit.centers, "Cluster centres");
        if distinct < self.k {
            warn!(
                "Number of distinct clusters ({distinct}) found smaller than the requested {}. Possibly due to duplicate embeddings.",
                self.k
            );
        }
        Ok(fit)
    }
}

impl Clusterer for KMeans {
    fn fit_predict(&self, embeddings: &Array2<f64>) -> AppResult<Vec<usize>> {
        Ok(self.fit(embeddings)?.labels)
    }
}
