//! Partition-based clustering: k-means with k-means++ seeding.
//!
//! Restarts are seeded from the run seed, so two runs with the same seed and
//! input produce identical partitions. Labels are `0..k`; empty clusters are
//! relocated to the point farthest from its center.

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use super::{squared_distance, Estimator};
use crate::core::config::PartitionConfig;
use crate::core::errors::{Result, RiskError};

const NAME: &str = "partition";

/// K-means clustering estimator
#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    max_iterations: usize,
    n_init: usize,
    tolerance: f64,
    seed: u64,
    centers: Option<Array2<f64>>,
    inertia: f64,
    iterations: usize,
    silhouette: Option<f64>,
    davies_bouldin: Option<f64>,
}

/// Outcome of one seeded restart
struct Restart {
    centers: Array2<f64>,
    labels: Vec<usize>,
    inertia: f64,
    iterations: usize,
}

impl KMeans {
    /// Create an estimator from configuration
    pub fn new(config: &PartitionConfig, seed: u64) -> Self {
        Self::with_params(
            config.k,
            config.max_iterations,
            config.n_init,
            config.tolerance,
            seed,
        )
    }

    /// Create an estimator from explicit parameters
    pub fn with_params(
        k: usize,
        max_iterations: usize,
        n_init: usize,
        tolerance: f64,
        seed: u64,
    ) -> Self {
        Self {
            k,
            max_iterations,
            n_init: n_init.max(1),
            tolerance,
            seed,
            centers: None,
            inertia: f64::NAN,
            iterations: 0,
            silhouette: None,
            davies_bouldin: None,
        }
    }

    /// Fitted centers, one row per partition
    pub fn centers(&self) -> Option<&Array2<f64>> {
        self.centers.as_ref()
    }

    /// Sum of squared distances to the assigned centers
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Mean silhouette coefficient of the fitted partitions, when at least
    /// two partitions are non-empty
    pub fn silhouette(&self) -> Option<f64> {
        self.silhouette
    }

    /// Davies-Bouldin index of the fitted partitions; lower is better
    pub fn davies_bouldin(&self) -> Option<f64> {
        self.davies_bouldin
    }

    /// Fit and return partition labels in `0..k`
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<Vec<usize>> {
        let n = x.nrows();
        if x.ncols() == 0 {
            return Err(RiskError::estimator_fit(NAME, "feature matrix has no columns"));
        }
        if n < self.k {
            return Err(RiskError::estimator_fit(
                NAME,
                format!("{} partitions requested for only {n} users", self.k),
            ));
        }

        let tolerance = self.tolerance * mean_feature_variance(x);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut best: Option<Restart> = None;

        for restart in 0..self.n_init {
            let initial = kmeans_plus_plus(x, self.k, &mut rng);
            let candidate = self.lloyd(x, initial, tolerance);
            debug!(
                restart,
                inertia = candidate.inertia,
                iterations = candidate.iterations,
                "k-means restart finished"
            );
            if best
                .as_ref()
                .map_or(true, |current| candidate.inertia < current.inertia)
            {
                best = Some(candidate);
            }
        }

        let best = best.ok_or_else(|| RiskError::estimator_fit(NAME, "no restart completed"))?;
        self.inertia = best.inertia;
        self.iterations = best.iterations;
        self.silhouette = silhouette_score(x, &best.labels, self.k);
        self.davies_bouldin = davies_bouldin_index(x, &best.labels, self.k);
        self.centers = Some(best.centers);
        Ok(best.labels)
    }

    fn lloyd(&self, x: ArrayView2<'_, f64>, mut centers: Array2<f64>, tolerance: f64) -> Restart {
        let mut iterations = 0;
        for _ in 0..self.max_iterations {
            iterations += 1;
            let (labels, distances) = assign(x, &centers);
            let updated = recompute_centers(x, &labels, &distances, self.k);

            let shift: f64 = centers
                .outer_iter()
                .zip(updated.outer_iter())
                .map(|(old, new)| squared_distance(old, new))
                .sum();
            centers = updated;
            if shift <= tolerance {
                break;
            }
        }

        let (labels, distances) = assign(x, &centers);
        Restart {
            centers,
            labels,
            inertia: distances.iter().sum(),
            iterations,
        }
    }
}

impl Estimator for KMeans {
    fn name(&self) -> &str {
        NAME
    }

    fn fit_predict(&mut self, x: ArrayView2<'_, f64>) -> Result<Array1<i64>> {
        let labels = self.fit(x)?;
        Ok(labels.into_iter().map(|l| l as i64).collect())
    }

    fn cluster_centers(&self) -> Option<Array2<f64>> {
        self.centers.clone()
    }

    fn fit_metrics(&self) -> IndexMap<String, f64> {
        let mut metrics = IndexMap::from([
            ("inertia".to_string(), self.inertia),
            ("iterations".to_string(), self.iterations as f64),
        ]);
        if let Some(silhouette) = self.silhouette {
            metrics.insert("silhouette".to_string(), silhouette);
        }
        if let Some(davies_bouldin) = self.davies_bouldin {
            metrics.insert("davies_bouldin".to_string(), davies_bouldin);
        }
        metrics
    }
}

/// Mean per-column variance, used to make the tolerance scale-free
fn mean_feature_variance(x: ArrayView2<'_, f64>) -> f64 {
    let variances = x.var_axis(Axis(0), 0.0);
    let mean = variances.mean().unwrap_or(0.0);
    if mean > 0.0 {
        mean
    } else {
        1.0
    }
}

/// k-means++ seeding: each new center is drawn with probability proportional
/// to its squared distance from the closest existing center.
fn kmeans_plus_plus(x: ArrayView2<'_, f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
    let n = x.nrows();
    let mut centers = Array2::zeros((k, x.ncols()));
    let first = rng.gen_range(0..n);
    centers.row_mut(0).assign(&x.row(first));

    let mut closest: Vec<f64> = (0..n)
        .map(|i| squared_distance(x.row(i), centers.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = n - 1;
            for (i, weight) in closest.iter().enumerate() {
                if target < *weight {
                    pick = i;
                    break;
                }
                target -= weight;
            }
            pick
        } else {
            rng.gen_range(0..n)
        };

        centers.row_mut(c).assign(&x.row(chosen));
        for (i, best) in closest.iter_mut().enumerate() {
            let d = squared_distance(x.row(i), centers.row(c));
            if d < *best {
                *best = d;
            }
        }
    }

    centers
}

/// Nearest center per row; ties go to the lowest center index
pub(crate) fn assign(x: ArrayView2<'_, f64>, centers: &Array2<f64>) -> (Vec<usize>, Vec<f64>) {
    (0..x.nrows())
        .into_par_iter()
        .map(|i| {
            let row = x.row(i);
            let mut best = (0, f64::INFINITY);
            for (c, center) in centers.outer_iter().enumerate() {
                let d = squared_distance(row, center);
                if d < best.1 {
                    best = (c, d);
                }
            }
            best
        })
        .unzip()
}

/// Mean silhouette over all rows, with Euclidean distances.
///
/// Rows in singleton partitions score 0. `None` when fewer than two
/// partitions are non-empty.
fn silhouette_score(x: ArrayView2<'_, f64>, labels: &[usize], k: usize) -> Option<f64> {
    let mut sizes = vec![0usize; k];
    for &label in labels {
        sizes[label] += 1;
    }
    if sizes.iter().filter(|&&size| size > 0).count() < 2 {
        return None;
    }

    let total: f64 = (0..x.nrows())
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            if sizes[own] < 2 {
                return 0.0;
            }
            let mut sums = vec![0.0; k];
            for (j, &label) in labels.iter().enumerate() {
                if j != i {
                    sums[label] += squared_distance(x.row(i), x.row(j)).sqrt();
                }
            }
            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = (0..k)
                .filter(|&c| c != own && sizes[c] > 0)
                .map(|c| sums[c] / sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);
            let spread = a.max(b);
            if spread > 0.0 {
                (b - a) / spread
            } else {
                0.0
            }
        })
        .sum();
    Some(total / x.nrows() as f64)
}

/// Davies-Bouldin index over the non-empty partitions, with centroids
/// recomputed from the labels. Coincident centroids contribute no similarity.
/// `None` when fewer than two partitions are non-empty.
fn davies_bouldin_index(x: ArrayView2<'_, f64>, labels: &[usize], k: usize) -> Option<f64> {
    let mut centroids = Array2::<f64>::zeros((k, x.ncols()));
    let mut sizes = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        let mut row = centroids.row_mut(label);
        row += &x.row(i);
        sizes[label] += 1;
    }
    let present: Vec<usize> = (0..k).filter(|&c| sizes[c] > 0).collect();
    if present.len() < 2 {
        return None;
    }
    for &c in &present {
        let size = sizes[c] as f64;
        centroids.row_mut(c).mapv_inplace(|v| v / size);
    }

    let mut scatter = vec![0.0; k];
    for (i, &label) in labels.iter().enumerate() {
        scatter[label] += squared_distance(x.row(i), centroids.row(label)).sqrt();
    }
    for &c in &present {
        scatter[c] /= sizes[c] as f64;
    }

    let worst: f64 = present
        .par_iter()
        .map(|&a| {
            present
                .iter()
                .filter(|&&b| b != a)
                .map(|&b| {
                    let separation = squared_distance(centroids.row(a), centroids.row(b)).sqrt();
                    if separation > 0.0 {
                        (scatter[a] + scatter[b]) / separation
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();
    Some(worst / present.len() as f64)
}

fn recompute_centers(
    x: ArrayView2<'_, f64>,
    labels: &[usize],
    distances: &[f64],
    k: usize,
) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros((k, x.ncols()));
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        let mut row = sums.row_mut(label);
        row += &x.row(i);
        counts[label] += 1;
    }

    // Farthest points first, each used at most once
    let mut relocation: Vec<usize> = (0..labels.len()).collect();
    relocation.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]).then(a.cmp(&b)));
    let mut relocation = relocation.into_iter();

    for c in 0..k {
        if counts[c] > 0 {
            let count = counts[c] as f64;
            sums.row_mut(c).mapv_inplace(|v| v / count);
        } else if let Some(i) = relocation.next() {
            sums.row_mut(c).assign(&x.row(i));
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, -0.1],
            [-0.1, 0.1],
            [0.05, 0.0],
            [10.0, 10.0],
            [10.1, 9.9],
            [9.9, 10.1],
            [10.0, 10.05],
        ]
    }

    #[test]
    fn test_separates_two_blobs() {
        let x = two_blobs();
        let mut kmeans = KMeans::with_params(2, 100, 5, 1e-4, 7);
        let labels = kmeans.fit(x.view()).unwrap();

        assert!(labels[..4].iter().all(|&l| l == labels[0]));
        assert!(labels[4..].iter().all(|&l| l == labels[4]));
        assert_ne!(labels[0], labels[4]);
        assert!(kmeans.inertia() < 1.0);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let x = two_blobs();
        let mut a = KMeans::with_params(3, 100, 3, 1e-4, 11);
        let mut b = KMeans::with_params(3, 100, 3, 1e-4, 11);
        assert_eq!(a.fit(x.view()).unwrap(), b.fit(x.view()).unwrap());
        assert_eq!(a.centers(), b.centers());
    }

    #[test]
    fn test_rejects_more_partitions_than_users() {
        let x = array![[1.0], [2.0]];
        let mut kmeans = KMeans::with_params(4, 10, 1, 1e-4, 0);
        let err = kmeans.fit(x.view()).unwrap_err();
        assert_eq!(err.estimator(), Some("partition"));
    }

    #[test]
    fn test_identical_points_do_not_panic() {
        let x = Array2::from_elem((6, 2), 3.0);
        let mut kmeans = KMeans::with_params(3, 10, 2, 1e-4, 5);
        let labels = kmeans.fit(x.view()).unwrap();
        assert_eq!(labels.len(), 6);
        assert_eq!(kmeans.inertia(), 0.0);
    }

    #[test]
    fn test_cluster_quality_on_separated_blobs() {
        let x = two_blobs();
        let mut kmeans = KMeans::with_params(2, 100, 5, 1e-4, 7);
        kmeans.fit_predict(x.view()).unwrap();

        let silhouette = kmeans.silhouette().unwrap();
        let davies_bouldin = kmeans.davies_bouldin().unwrap();
        assert!(silhouette > 0.95 && silhouette <= 1.0, "silhouette {silhouette}");
        assert!(davies_bouldin >= 0.0 && davies_bouldin < 0.05, "davies-bouldin {davies_bouldin}");

        let metrics = kmeans.fit_metrics();
        assert_eq!(metrics["silhouette"], silhouette);
        assert_eq!(metrics["davies_bouldin"], davies_bouldin);
    }

    #[test]
    fn test_cluster_quality_of_overlapping_partitions_is_poor() {
        // One blob split in two scores far below well-separated blobs
        let x = array![[0.0, 0.0], [0.2, 0.1], [0.4, 0.0], [0.6, 0.1], [0.8, 0.0], [1.0, 0.1]];
        let labels = [0, 0, 0, 1, 1, 1];
        let silhouette = silhouette_score(x.view(), &labels, 2).unwrap();
        let davies_bouldin = davies_bouldin_index(x.view(), &labels, 2).unwrap();
        assert!(silhouette < 0.7, "silhouette {silhouette}");
        assert!(davies_bouldin > 0.3, "davies-bouldin {davies_bouldin}");
    }

    #[test]
    fn test_cluster_quality_needs_two_partitions() {
        let x = Array2::from_elem((6, 2), 3.0);
        let mut kmeans = KMeans::with_params(3, 10, 2, 1e-4, 5);
        kmeans.fit(x.view()).unwrap();
        assert_eq!(kmeans.silhouette(), None);
        assert!(!kmeans.fit_metrics().contains_key("davies_bouldin"));
    }

    #[test]
    fn test_exposes_centers_and_metrics() {
        let x = two_blobs();
        let mut kmeans = KMeans::with_params(2, 100, 2, 1e-4, 3);
        kmeans.fit_predict(x.view()).unwrap();
        let centers = kmeans.cluster_centers().unwrap();
        assert_eq!(centers.dim(), (2, 2));
        let metrics = kmeans.fit_metrics();
        assert!(metrics.contains_key("inertia"));
        assert!(metrics["iterations"] >= 1.0);
    }
}
