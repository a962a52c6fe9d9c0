//! Probabilistic mixture clustering: full-covariance Gaussian mixture fitted
//! with expectation-maximization.
//!
//! Responsibilities are initialized from a seeded k-means run. Component
//! densities are evaluated through a Cholesky factor of each covariance; a
//! covariance that is not positive definite fails the fit instead of
//! producing NaN probabilities.

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::debug;

use super::partition::KMeans;
use super::Estimator;
use crate::core::config::MixtureConfig;
use crate::core::errors::{Result, RiskError};

const NAME: &str = "mixture";
const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// One fitted component
#[derive(Debug, Clone)]
struct Component {
    weight: f64,
    mean: DVector<f64>,
    /// Lower Cholesky factor of the covariance
    chol: DMatrix<f64>,
    log_det: f64,
}

/// Gaussian mixture estimator
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    components: usize,
    max_iterations: usize,
    tolerance: f64,
    reg_covar: f64,
    seed: u64,
    fitted: Vec<Component>,
    mean_log_likelihood: f64,
    n_samples: usize,
    iterations: usize,
    converged: bool,
}

impl GaussianMixture {
    /// Create an estimator from configuration
    pub fn new(config: &MixtureConfig, seed: u64) -> Self {
        Self {
            components: config.components,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            reg_covar: config.reg_covar,
            seed,
            fitted: Vec::new(),
            mean_log_likelihood: f64::NAN,
            n_samples: 0,
            iterations: 0,
            converged: false,
        }
    }

    /// Component means, one row per component
    pub fn means(&self) -> Option<Array2<f64>> {
        let first = self.fitted.first()?;
        let dims = first.mean.len();
        let mut means = Array2::zeros((self.fitted.len(), dims));
        for (c, component) in self.fitted.iter().enumerate() {
            for d in 0..dims {
                means[[c, d]] = component.mean[d];
            }
        }
        Some(means)
    }

    /// Mixing weights
    pub fn weights(&self) -> Vec<f64> {
        self.fitted.iter().map(|c| c.weight).collect()
    }

    /// Fit the mixture; returns the responsibilities of the final E-step
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let n = x.nrows();
        if x.ncols() == 0 {
            return Err(RiskError::estimator_fit(NAME, "feature matrix has no columns"));
        }
        if n < self.components {
            return Err(RiskError::estimator_fit(
                NAME,
                format!("{} components requested for only {n} users", self.components),
            ));
        }

        let mut init = KMeans::with_params(self.components, 100, 1, 1e-4, self.seed);
        let labels = init
            .fit(x)
            .map_err(|e| RiskError::estimator_fit(NAME, format!("initialization failed: {e}")))?;
        let mut resp = Array2::<f64>::zeros((n, self.components));
        for (i, label) in labels.into_iter().enumerate() {
            resp[[i, label]] = 1.0;
        }

        let mut previous = f64::NEG_INFINITY;
        self.converged = false;
        self.iterations = 0;
        for iteration in 0..self.max_iterations {
            self.iterations = iteration + 1;
            self.fitted = self.maximization(x, &resp)?;
            let (next, mean_ll) = expectation(&self.fitted, x);
            resp = next;
            self.mean_log_likelihood = mean_ll;

            if (mean_ll - previous).abs() < self.tolerance {
                self.converged = true;
                break;
            }
            previous = mean_ll;
        }

        debug!(
            iterations = self.iterations,
            converged = self.converged,
            mean_log_likelihood = self.mean_log_likelihood,
            "mixture fit finished"
        );
        self.n_samples = n;
        Ok(resp)
    }

    fn maximization(&self, x: ArrayView2<'_, f64>, resp: &Array2<f64>) -> Result<Vec<Component>> {
        let n = x.nrows() as f64;
        let dims = x.ncols();
        let totals = resp.sum_axis(Axis(0));

        (0..self.components)
            .map(|c| {
                let nk = totals[c] + 10.0 * f64::EPSILON;
                let weights = resp.column(c);

                let mut mean = DVector::<f64>::zeros(dims);
                for (row, &r) in x.outer_iter().zip(weights.iter()) {
                    for d in 0..dims {
                        mean[d] += r * row[d];
                    }
                }
                mean /= nk;

                let mut cov = DMatrix::<f64>::zeros(dims, dims);
                for (row, &r) in x.outer_iter().zip(weights.iter()) {
                    if r == 0.0 {
                        continue;
                    }
                    let diff = DVector::from_iterator(dims, row.iter().zip(mean.iter()).map(|(v, m)| v - m));
                    cov += (&diff * diff.transpose()) * r;
                }
                cov /= nk;
                for d in 0..dims {
                    cov[(d, d)] += self.reg_covar;
                }

                let chol = cov.cholesky().ok_or_else(|| {
                    RiskError::estimator_fit(
                        NAME,
                        format!(
                            "covariance of component {c} is singular; increase reg_covar or reduce components"
                        ),
                    )
                })?;
                let l = chol.l();
                let log_det = 2.0 * l.diagonal().iter().map(|v| v.ln()).sum::<f64>();

                Ok(Component {
                    weight: nk / n,
                    mean,
                    chol: l,
                    log_det,
                })
            })
            .collect()
    }

    fn free_parameters(&self) -> f64 {
        let k = self.fitted.len() as f64;
        let d = self.fitted.first().map_or(0, |c| c.mean.len()) as f64;
        (k - 1.0) + k * d + k * d * (d + 1.0) / 2.0
    }
}

/// Weighted log-densities of every row under every component, normalized
/// with log-sum-exp. Returns responsibilities and the mean log-likelihood.
fn expectation(components: &[Component], x: ArrayView2<'_, f64>) -> (Array2<f64>, f64) {
    let k = components.len();
    let rows: Vec<(Vec<f64>, f64)> = (0..x.nrows())
        .into_par_iter()
        .map(|i| {
            let row = x.row(i);
            let weighted: Vec<f64> = components
                .iter()
                .map(|c| c.weight.ln() + log_density(c, row.iter().copied()))
                .collect();
            let max = weighted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let log_norm = max + weighted.iter().map(|w| (w - max).exp()).sum::<f64>().ln();
            let resp = weighted.iter().map(|w| (w - log_norm).exp()).collect();
            (resp, log_norm)
        })
        .collect();

    let mut resp = Array2::zeros((x.nrows(), k));
    let mut total = 0.0;
    for (i, (row, log_norm)) in rows.into_iter().enumerate() {
        for (c, value) in row.into_iter().enumerate() {
            resp[[i, c]] = value;
        }
        total += log_norm;
    }
    let mean = if x.nrows() > 0 {
        total / x.nrows() as f64
    } else {
        0.0
    };
    (resp, mean)
}

fn log_density(component: &Component, row: impl Iterator<Item = f64>) -> f64 {
    let dims = component.mean.len();
    let diff = DVector::from_iterator(dims, row.zip(component.mean.iter()).map(|(v, m)| v - m));
    let mahalanobis = component
        .chol
        .solve_lower_triangular(&diff)
        .map_or(f64::INFINITY, |z| z.norm_squared());
    -0.5 * (dims as f64 * LN_2PI + component.log_det + mahalanobis)
}

impl Estimator for GaussianMixture {
    fn name(&self) -> &str {
        NAME
    }

    fn fit_predict(&mut self, x: ArrayView2<'_, f64>) -> Result<Array1<i64>> {
        let resp = self.fit(x)?;
        Ok(resp
            .outer_iter()
            .map(|row| {
                let mut best = 0;
                for (c, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = c;
                    }
                }
                best as i64
            })
            .collect())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<Result<Array2<f64>>> {
        if self.fitted.is_empty() {
            return Some(Err(RiskError::estimator_fit(NAME, "predict_proba called before fit")));
        }
        Some(Ok(expectation(&self.fitted, x).0))
    }

    fn cluster_centers(&self) -> Option<Array2<f64>> {
        self.means()
    }

    fn fit_metrics(&self) -> IndexMap<String, f64> {
        let n = self.n_samples as f64;
        let total_ll = self.mean_log_likelihood * n;
        let p = self.free_parameters();
        IndexMap::from([
            ("mean_log_likelihood".to_string(), self.mean_log_likelihood),
            ("bic".to_string(), -2.0 * total_ll + p * n.ln()),
            ("aic".to_string(), -2.0 * total_ll + 2.0 * p),
            ("iterations".to_string(), self.iterations as f64),
            ("converged".to_string(), if self.converged { 1.0 } else { 0.0 }),
        ])
    }
}
