//! Isolation-based anomaly scoring (isolation forest).
//!
//! Native conventions: `score_samples` is the negated anomaly score
//! `-2^(-E[h(x)] / c(psi))`, so lower values are more anomalous. The decision
//! function subtracts an offset chosen so that the `contamination` share of
//! the training rows falls below zero; those rows are labeled `-1` and the
//! rest `1`. Rows tied exactly at the offset are not flagged.

use indexmap::IndexMap;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::Estimator;
use crate::core::config::IsolationConfig;
use crate::core::errors::{Result, RiskError};

const NAME: &str = "isolation";
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Native label for anomalies
pub const ANOMALY: i64 = -1;
/// Native label for inliers
pub const INLIER: i64 = 1;

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

impl Node {
    fn path_length(&self, row: ArrayView1<'_, f64>, depth: f64) -> f64 {
        match self {
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] < *threshold {
                    left.path_length(row, depth + 1.0)
                } else {
                    right.path_length(row, depth + 1.0)
                }
            }
            Node::Leaf { size } => depth + average_path_length(*size),
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Isolation forest estimator
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_trees: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
    trees: Vec<Node>,
    sample_size: usize,
    offset: f64,
    n_flagged: usize,
}

impl IsolationForest {
    /// Create an estimator from configuration
    pub fn new(config: &IsolationConfig, seed: u64) -> Self {
        Self {
            n_trees: config.n_trees,
            max_samples: config.max_samples,
            contamination: config.contamination,
            seed,
            trees: Vec::new(),
            sample_size: 0,
            offset: 0.0,
            n_flagged: 0,
        }
    }

    /// Threshold subtracted from `score_samples` to form the decision function
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Build the forest on `x`
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 {
            return Err(RiskError::estimator_fit(NAME, "feature matrix is empty"));
        }

        let psi = self.max_samples.min(n);
        let height_limit = (psi as f64).log2().ceil().max(1.0) as usize;
        let seed = self.seed;

        self.trees = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(t as u64));
                let indices = sample(&mut rng, n, psi).into_vec();
                build_tree(x, indices, 0, height_limit, &mut rng)
            })
            .collect();
        self.sample_size = psi;

        let scores = self.score_samples(x)?;
        let mut sorted = scores.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n_out = ((self.contamination * n as f64).round() as usize).clamp(1, n);
        self.offset = if n_out < n {
            0.5 * (sorted[n_out - 1] + sorted[n_out])
        } else {
            sorted[n - 1] + 1.0
        };
        self.n_flagged = scores.iter().filter(|&&s| s < self.offset).count();
        Ok(())
    }

    /// Negated anomaly score per row; lower is more anomalous
    pub fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(RiskError::estimator_fit(NAME, "forest has not been fitted"));
        }
        let normalizer = match average_path_length(self.sample_size) {
            c if c > 0.0 => c,
            _ => 1.0,
        };
        let n_trees = self.trees.len() as f64;

        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let mean_depth =
                    self.trees.iter().map(|t| t.path_length(row, 0.0)).sum::<f64>() / n_trees;
                -(2f64.powf(-mean_depth / normalizer))
            })
            .collect();
        Ok(Array1::from(scores))
    }
}

fn build_tree(
    x: ArrayView2<'_, f64>,
    indices: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut ChaCha8Rng,
) -> Node {
    if depth >= height_limit || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // Only features that still vary within the node can split it
    let splittable: Vec<(usize, f64, f64)> = (0..x.ncols())
        .filter_map(|f| {
            let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = x[[i, f]];
                (lo.min(v), hi.max(v))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    if splittable.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| x[[i, feature]] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(x, left, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(x, right, depth + 1, height_limit, rng)),
    }
}

impl Estimator for IsolationForest {
    fn name(&self) -> &str {
        NAME
    }

    fn fit_predict(&mut self, x: ArrayView2<'_, f64>) -> Result<Array1<i64>> {
        self.fit(x)?;
        let offset = self.offset;
        Ok(self
            .score_samples(x)?
            .mapv(|s| if s - offset < 0.0 { ANOMALY } else { INLIER }))
    }

    fn decision_function(&self, x: ArrayView2<'_, f64>) -> Option<Result<Array1<f64>>> {
        let offset = self.offset;
        Some(self.score_samples(x).map(|scores| scores.mapv(|s| s - offset)))
    }

    fn fit_metrics(&self) -> IndexMap<String, f64> {
        IndexMap::from([
            ("offset".to_string(), self.offset),
            ("sample_size".to_string(), self.sample_size as f64),
            ("flagged".to_string(), self.n_flagged as f64),
        ])
    }
}
