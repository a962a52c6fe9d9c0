//! Density-based clustering (DBSCAN).
//!
//! Labels follow the usual convention: clusters are numbered from 0 in
//! discovery order and noise points are `-1`. A point is a core point when its
//! eps-neighbourhood, the point itself included, holds at least
//! `min_samples` points.

use std::collections::VecDeque;

use indexmap::IndexMap;
use ndarray::{Array1, ArrayView2};
use rayon::prelude::*;

use super::{squared_distance, Estimator};
use crate::core::config::DensityConfig;
use crate::core::errors::{Result, RiskError};

const NAME: &str = "density";

/// Native label for noise points
pub const NOISE: i64 = -1;

/// DBSCAN estimator
#[derive(Debug, Clone)]
pub struct Dbscan {
    eps: f64,
    min_samples: usize,
    n_clusters: usize,
    n_noise: usize,
    n_core: usize,
}

impl Dbscan {
    /// Create an estimator from configuration
    pub fn new(config: &DensityConfig) -> Self {
        Self::with_params(config.eps, config.min_samples)
    }

    /// Create an estimator from explicit parameters
    pub fn with_params(eps: f64, min_samples: usize) -> Self {
        Self {
            eps,
            min_samples,
            n_clusters: 0,
            n_noise: 0,
            n_core: 0,
        }
    }

    /// Number of clusters found by the last fit
    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    /// Number of noise points found by the last fit
    pub fn n_noise(&self) -> usize {
        self.n_noise
    }

    fn neighbourhoods(&self, x: ArrayView2<'_, f64>) -> Vec<Vec<usize>> {
        let eps_sq = self.eps * self.eps;
        (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                (0..x.nrows())
                    .filter(|&j| squared_distance(row, x.row(j)) <= eps_sq)
                    .collect()
            })
            .collect()
    }
}

impl Estimator for Dbscan {
    fn name(&self) -> &str {
        NAME
    }

    fn fit_predict(&mut self, x: ArrayView2<'_, f64>) -> Result<Array1<i64>> {
        if x.nrows() == 0 {
            return Err(RiskError::estimator_fit(NAME, "feature matrix has no rows"));
        }

        let neighbours = self.neighbourhoods(x);
        let is_core: Vec<bool> = neighbours
            .iter()
            .map(|n| n.len() >= self.min_samples)
            .collect();

        let mut labels = vec![NOISE; x.nrows()];
        let mut cluster: i64 = 0;
        let mut queue = VecDeque::new();

        for seed in 0..x.nrows() {
            if labels[seed] != NOISE || !is_core[seed] {
                continue;
            }
            labels[seed] = cluster;
            queue.push_back(seed);

            while let Some(point) = queue.pop_front() {
                if !is_core[point] {
                    continue;
                }
                for &neighbour in &neighbours[point] {
                    if labels[neighbour] == NOISE {
                        labels[neighbour] = cluster;
                        queue.push_back(neighbour);
                    }
                }
            }
            cluster += 1;
        }

        self.n_clusters = cluster as usize;
        self.n_noise = labels.iter().filter(|&&l| l == NOISE).count();
        self.n_core = is_core.iter().filter(|&&c| c).count();
        Ok(Array1::from(labels))
    }

    fn fit_metrics(&self) -> IndexMap<String, f64> {
        IndexMap::from([
            ("clusters".to_string(), self.n_clusters as f64),
            ("noise_points".to_string(), self.n_noise as f64),
            ("core_points".to_string(), self.n_core as f64),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_isolated_point_is_noise() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [0.1, 0.1],
            [5.0, 5.0],
        ];
        let mut dbscan = Dbscan::with_params(0.5, 3);
        let labels = dbscan.fit_predict(x.view()).unwrap();

        assert_eq!(labels.to_vec(), vec![0, 0, 0, 0, NOISE]);
        assert_eq!(dbscan.n_clusters(), 1);
        assert_eq!(dbscan.n_noise(), 1);
    }

    #[test]
    fn test_two_clusters_in_discovery_order() {
        let x = array![
            [0.0],
            [0.1],
            [0.2],
            [10.0],
            [10.1],
            [10.2],
        ];
        let mut dbscan = Dbscan::with_params(0.15, 2);
        let labels = dbscan.fit_predict(x.view()).unwrap();
        assert_eq!(labels.to_vec(), vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_border_point_joins_cluster() {
        // The last point is within eps of a core point but is not core itself
        let x = array![[0.0], [0.1], [0.2], [0.6]];
        let mut dbscan = Dbscan::with_params(0.45, 3);
        let labels = dbscan.fit_predict(x.view()).unwrap();
        assert_eq!(labels.to_vec(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_everything_noise_when_sparse() {
        let x = array![[0.0], [10.0], [20.0]];
        let mut dbscan = Dbscan::with_params(0.5, 2);
        let labels = dbscan.fit_predict(x.view()).unwrap();
        assert!(labels.iter().all(|&l| l == NOISE));
        assert_eq!(dbscan.fit_metrics()["noise_points"], 3.0);
    }
}
