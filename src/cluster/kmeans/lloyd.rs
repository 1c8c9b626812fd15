use ndarray::prelude::*;

use super::utils::argmin;
use crate::cluster::linalg::row_norms;

static CHUNK_SIZE: usize = 256;

/// Outcome of one Lloyd run.
#[derive(Debug, Clone)]
pub struct LloydRun {
    pub labels: Array1<usize>,  // (n_samples,)
    pub inertia: f64,
    pub centers: Array2<f64>,   // (n_clusters, n_features)
    pub n_iter: usize,
}

/// Weighted sum of squared distances to the assigned centers.
fn inertia_dense(
    x: &Array2<f64>,             // (n_samples, n_features)
    sample_weight: &Array1<f64>, // (n_samples,)
    centers: &Array2<f64>,       // (n_clusters, n_features)
    labels: &Array1<usize>,      // (n_samples,)
) -> f64 {
    x.rows()
        .into_iter()
        .zip(labels)
        .zip(sample_weight)
        .map(|((row, &label), w)| {
            let diff = &row - &centers.row(label);
            diff.dot(&diff) * w
        })
        .sum()
}

struct ChunkUpdate {
    labels: Array1<usize>,
    weighted_sums: Array2<f64>,
    weight_in_clusters: Array1<f64>,
}

fn update_chunk_dense(
    x_chunk: ArrayView2<f64>,            // (chunk_size, n_features)
    sample_weight_chunk: ArrayView1<f64>, // (chunk_size,)
    centers_old: &Array2<f64>,           // (n_clusters, n_features)
    centers_squared_norms: &Array1<f64>, // (n_clusters,)
    update_centers: bool,
) -> ChunkUpdate {
    let n_samples = x_chunk.nrows();
    let (n_clusters, n_features) = centers_old.dim();

    // |x|² is constant per row, so only -2x·c + |c|² decides the argmin.
    let mut pairwise = -2.0 * x_chunk.dot(&centers_old.t()); // (chunk_size, n_clusters)
    pairwise += centers_squared_norms;

    let mut labels = Array1::<usize>::zeros(n_samples);
    let mut weighted_sums = Array2::<f64>::zeros((n_clusters, n_features));
    let mut weight_in_clusters = Array1::<f64>::zeros(n_clusters);

    for (i, distances) in pairwise.rows().into_iter().enumerate() {
        let label = argmin(distances).unwrap_or(0);
        labels[i] = label;
        if update_centers {
            let weight = sample_weight_chunk[i];
            weight_in_clusters[label] += weight;
            weighted_sums
                .row_mut(label)
                .scaled_add(weight, &x_chunk.row(i));
        }
    }

    ChunkUpdate {
        labels,
        weighted_sums,
        weight_in_clusters,
    }
}

/// One Lloyd iteration, processed in row chunks to bound temporaries.
///
/// Returns `(centers_new, labels, center_shift)`. Empty clusters keep their
/// previous center.
fn lloyd_iter_chunked_dense(
    x: &Array2<f64>,             // (n_samples, n_features)
    sample_weight: &Array1<f64>, // (n_samples,)
    centers_old: &Array2<f64>,   // (n_clusters, n_features)
    update_centers: bool,
) -> (Array2<f64>, Array1<usize>, Array1<f64>) {
    let n_samples = x.nrows();
    let (n_clusters, n_features) = centers_old.dim();

    let centers_squared_norms = row_norms(centers_old, true);
    let mut weighted_sums = Array2::<f64>::zeros((n_clusters, n_features));
    let mut weight_in_clusters = Array1::<f64>::zeros(n_clusters);
    let mut labels = Array1::<usize>::zeros(n_samples);

    let mut start = 0;
    while start < n_samples {
        let end = (start + CHUNK_SIZE).min(n_samples);
        let chunk = update_chunk_dense(
            x.slice(s![start..end, ..]),
            sample_weight.slice(s![start..end]),
            centers_old,
            &centers_squared_norms,
            update_centers,
        );
        labels.slice_mut(s![start..end]).assign(&chunk.labels);
        if update_centers {
            weighted_sums += &chunk.weighted_sums;
            weight_in_clusters += &chunk.weight_in_clusters;
        }
        start = end;
    }

    if !update_centers {
        return (centers_old.clone(), labels, Array1::zeros(n_clusters));
    }

    let mut centers_new = weighted_sums;
    for (cluster, mut row) in centers_new.rows_mut().into_iter().enumerate() {
        let weight = weight_in_clusters[cluster];
        if weight > 0.0 {
            row /= weight;
        } else {
            row.assign(&centers_old.row(cluster));
        }
    }
    let center_shift = row_norms(&(centers_old - &centers_new), false);
    (centers_new, labels, center_shift)
}

/// Run a single k-means with Lloyd's algorithm from the given centers.
///
/// Stops when the labels stop changing or the squared center shift falls
/// to `tol`.
pub fn kmeans_single_lloyd(
    x: &Array2<f64>,             // (n_samples, n_features)
    sample_weight: &Array1<f64>, // (n_samples,)
    centers_init: &Array2<f64>,  // (n_clusters, n_features)
    max_iter: usize,
    tol: f64,
) -> LloydRun {
    let n_samples = x.nrows();

    let mut centers = centers_init.clone();
    let mut labels = Array1::<usize>::zeros(n_samples);
    let mut labels_old = Array1::<usize>::from_elem(n_samples, usize::MAX);
    let mut strict_convergence = false;
    let mut n_iter = 0;

    for i in 0..max_iter {
        let (centers_new, new_labels, center_shift) =
            lloyd_iter_chunked_dense(x, sample_weight, &centers, true);
        n_iter = i + 1;
        centers = centers_new;

        if new_labels == labels_old {
            labels = new_labels;
            strict_convergence = true;
            break;
        }

        let center_shift_tot = center_shift.dot(&center_shift);
        labels = new_labels.clone();
        labels_old = new_labels;
        if center_shift_tot <= tol {
            break;
        }
    }

    if !strict_convergence {
        // Labels must match the final centers.
        let (_, refreshed, _) = lloyd_iter_chunked_dense(x, sample_weight, &centers, false);
        labels = refreshed;
    }

    let inertia = inertia_dense(x, sample_weight, &centers, &labels);
    LloydRun {
        labels,
        inertia,
        centers,
        n_iter,
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, array};

    use super::*;

    fn assert_all_close_2d(actual: &Array2<f64>, expected: &Array2<f64>, tol: f64) {
        assert_eq!(actual.dim(), expected.dim(), "2D shapes differ");
        for ((idx, a), e) in actual.indexed_iter().zip(expected.iter()) {
            assert!((a - e).abs() <= tol, "expected {e}, got {a} at {idx:?}");
        }
    }

    #[test]
    fn lloyd_matches_two_cluster_example() {
        let x = array![
            [1.0, 2.0],
            [1.0, 4.0],
            [1.0, 0.0],
            [10.0, 2.0],
            [10.0, 4.0],
            [10.0, 0.0]
        ];
        let sample_weight = Array1::<f64>::ones(x.nrows());
        let centers_init = array![[1.0, 2.0], [10.0, 2.0]];

        let run = kmeans_single_lloyd(&x, &sample_weight, &centers_init, 20, 1e-6);

        assert!(run.n_iter > 0);
        assert_eq!(run.labels.to_vec(), vec![0, 0, 0, 1, 1, 1]);
        assert_all_close_2d(&run.centers, &array![[1.0, 2.0], [10.0, 2.0]], 1e-8);
        assert!((run.inertia - 16.0).abs() < 1e-8, "inertia={}", run.inertia);
    }

    #[test]
    fn lloyd_respects_sample_weights() {
        let x = array![[0.0], [2.0], [10.0]];
        let sample_weight = arr1(&[1.0, 3.0, 1.0]);
        let centers_init = array![[0.0], [10.0]];

        let run = kmeans_single_lloyd(&x, &sample_weight, &centers_init, 20, 1e-8);

        assert_eq!(run.labels.to_vec(), vec![0, 0, 1]);
        assert_all_close_2d(&run.centers, &array![[1.5], [10.0]], 1e-8);
        assert!((run.inertia - 3.0).abs() < 1e-8, "inertia={}", run.inertia);
    }

    #[test]
    fn labelling_pass_leaves_centers_untouched() {
        let x = array![[0.0], [9.0], [10.0], [11.0]];
        let sample_weight = Array1::<f64>::ones(x.nrows());
        let centers_old = array![[0.0], [10.0]];

        let (centers_new, labels, center_shift) =
            lloyd_iter_chunked_dense(&x, &sample_weight, &centers_old, false);

        assert_eq!(labels.to_vec(), vec![0, 1, 1, 1]);
        assert_eq!(centers_new, centers_old);
        assert!(center_shift.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn empty_cluster_keeps_its_center() {
        let x = array![[0.0], [1.0]];
        let sample_weight = Array1::<f64>::ones(2);
        let centers_old = array![[0.5], [100.0]];
        let (centers_new, labels, _) =
            lloyd_iter_chunked_dense(&x, &sample_weight, &centers_old, true);
        assert_eq!(labels.to_vec(), vec![0, 0]);
        assert_eq!(centers_new, array![[0.5], [100.0]]);
    }

    #[test]
    fn chunked_iteration_handles_multiple_chunks() {
        // 270 rows span two chunks.
        let mut data = vec![0.0; 135];
        data.extend(vec![10.0; 135]);
        let x = Array2::from_shape_vec((270, 1), data).unwrap();
        let sample_weight = Array1::<f64>::ones(x.nrows());
        let centers_init = array![[0.0], [10.0]];

        let run = kmeans_single_lloyd(&x, &sample_weight, &centers_init, 30, 1e-8);

        assert_all_close_2d(&run.centers, &array![[0.0], [10.0]], 1e-8);
        let zeros = run.labels.iter().filter(|&&l| l == 0).count();
        assert_eq!((zeros, run.labels.len() - zeros), (135, 135));
    }
}
