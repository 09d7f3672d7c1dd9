//! Robust weighted least squares: iteratively reweighted adjustment gated by a
//! Chi-square test on the unit variance.
use log::debug;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::{cfg::IrlsOpts, constants::WEIGHT_FLOOR, prelude::Error};

/// Two sided acceptance region of the variance test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ChiSquareBounds {
    /// Builds the acceptance region for `dof` degrees of freedom at `alpha` significance
    pub fn new(dof: usize, alpha: f64) -> Result<Self, Error> {
        let chi2 = ChiSquared::new(dof as f64).map_err(|_| Error::InsufficientData {
            needed: 1,
            got: dof,
        })?;
        Ok(Self {
            lower: chi2.inverse_cdf(alpha / 2.0),
            upper: chi2.inverse_cdf(1.0 - alpha / 2.0),
        })
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }
}

/// Adjustment state carried from one iteration to the next
#[derive(Debug, Clone, PartialEq)]
pub struct IrlsState {
    /// Iterations performed so far
    pub iteration: usize,
    /// Cumulated unit variance (product of all So so far)
    pub factor: f64,
    /// Observation weights (diagonal of P)
    pub weights: DVector<f64>,
}

impl IrlsState {
    /// All weights set to 1
    pub fn initial(size: usize) -> Self {
        Self {
            iteration: 0,
            factor: 1.0,
            weights: DVector::from_element(size, 1.0),
        }
    }
}

/// Outcome of one [irls_step]
#[derive(Debug, Clone)]
pub struct IrlsStep {
    pub solution: DVector<f64>,
    pub residuals: DVector<f64>,
    /// Unit variance of this step
    pub so: f64,
    /// |v| / (So . So_cumulated)
    pub normalized: DVector<f64>,
    /// Chi-square test verdict
    pub passed: bool,
    /// State to use on next iteration: reweighted if the test failed
    pub next: IrlsState,
}

/// Final adjustment
#[derive(Debug, Clone)]
pub struct IrlsSolution {
    pub solution: DVector<f64>,
    /// Formal parameter uncertainties
    pub sigmas: DVector<f64>,
    pub residuals: DVector<f64>,
    pub normalized: DVector<f64>,
    /// Weights of the solve that produced `residuals`
    pub weights: DVector<f64>,
    /// Observations within the outlier limit
    pub accepted: Vec<bool>,
    pub so: f64,
    pub factor: f64,
    pub iterations: usize,
    pub passed: bool,
    pub dof: usize,
}

impl IrlsSolution {
    /// Number of rejected (down-weighted) observations
    pub fn rejected(&self) -> usize {
        self.accepted.iter().filter(|ok| !**ok).count()
    }

    /// Rejected fraction of all observations
    pub fn down_frac(&self) -> f64 {
        if self.accepted.is_empty() {
            0.0
        } else {
            self.rejected() as f64 / self.accepted.len() as f64
        }
    }

    /// Weighted RMS of the residuals
    pub fn wrms(&self) -> f64 {
        wrms(&self.residuals, &self.weights)
    }
}

/// Solves the weighted normal equations. Columns are equilibrated
/// prior inversion: coordinates (1E6 m) and translations (1 m) share one system.
/// ## Returns
/// - solution and inverse of the normal matrix
fn normal_solve(
    a: &DMatrix<f64>,
    weights: &DVector<f64>,
    l: &DVector<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), Error> {
    let at_p = {
        let mut at = a.transpose();
        for (j, mut col) in at.column_iter_mut().enumerate() {
            col *= weights[j];
        }
        at
    };

    let n = &at_p * a;
    let c = &at_p * l;

    let d = DVector::from_iterator(
        n.nrows(),
        n.diagonal()
            .iter()
            .map(|nii| if *nii > 0.0 { 1.0 / nii.sqrt() } else { 1.0 }),
    );
    let d_mat = DMatrix::from_diagonal(&d);

    let n_scaled = &d_mat * n * &d_mat;
    let n_scaled_inv = n_scaled.try_inverse().ok_or(Error::MatrixInversion)?;
    let n_inv = &d_mat * n_scaled_inv * &d_mat;

    let x = &n_inv * c;
    Ok((x, n_inv))
}

/// Weighted RMS
pub fn wrms(residuals: &DVector<f64>, weights: &DVector<f64>) -> f64 {
    let sum_p = weights.sum();
    if sum_p <= 0.0 {
        return 0.0;
    }
    let sum_pvv = residuals
        .iter()
        .zip(weights.iter())
        .map(|(v, p)| p * v * v)
        .sum::<f64>();
    (sum_pvv / sum_p).sqrt()
}

/// Percentile (linear interpolation between closest ranks), `q` within [0, 100]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Interquartile range
pub fn iqr(values: &[f64]) -> f64 {
    percentile(values, 75.0) - percentile(values, 25.0)
}

/// One reweighting iteration. Pure: the previous [IrlsState] is left untouched.
pub fn irls_step(
    a: &DMatrix<f64>,
    l: &DVector<f64>,
    state: &IrlsState,
    bounds: &ChiSquareBounds,
    limit: f64,
) -> Result<IrlsStep, Error> {
    let dof = a.nrows().saturating_sub(a.ncols());
    if dof == 0 {
        return Err(Error::InsufficientData {
            needed: a.ncols() + 1,
            got: a.nrows(),
        });
    }

    let (solution, _) = normal_solve(a, &state.weights, l)?;
    let residuals = l - a * &solution;

    let vpv = residuals
        .iter()
        .zip(state.weights.iter())
        .map(|(v, p)| p * v * v)
        .sum::<f64>();

    let so = (vpv / dof as f64).sqrt();
    let factor = state.factor * so;

    // exact fit: nothing left to reweight
    if factor <= f64::EPSILON {
        return Ok(IrlsStep {
            normalized: DVector::zeros(residuals.len()),
            solution,
            residuals,
            so,
            passed: true,
            next: IrlsState {
                iteration: state.iteration + 1,
                factor: state.factor,
                weights: state.weights.clone(),
            },
        });
    }

    let normalized = residuals.map(|v| v.abs() / factor);
    let x = so.powi(2) * dof as f64;
    let passed = bounds.contains(x);

    debug!(
        "irls #{}: so={:.4E} x={:.3} [{:.3}; {:.3}] pass={}",
        state.iteration, so, x, bounds.lower, bounds.upper, passed
    );

    let weights = if passed {
        state.weights.clone()
    } else {
        normalized.map(|s| {
            let f = if s > limit {
                10.0_f64.powf(limit - s).max(f64::EPSILON)
            } else {
                1.0
            };
            (f / factor).powi(2)
        })
    };

    Ok(IrlsStep {
        solution,
        residuals,
        so,
        normalized,
        passed,
        next: IrlsState {
            iteration: state.iteration + 1,
            factor,
            weights,
        },
    })
}

/// Runs [irls_step] until the Chi-square test passes or `opts.max_iterations` is reached.
/// ## Input
/// - a: design matrix (observations x parameters)
/// - l: observation vector
/// - opts: [IrlsOpts]
pub fn adjust(a: &DMatrix<f64>, l: &DVector<f64>, opts: &IrlsOpts) -> Result<IrlsSolution, Error> {
    let (nobs, npar) = a.shape();
    if nobs <= npar {
        return Err(Error::InsufficientData {
            needed: npar + 1,
            got: nobs,
        });
    }

    let dof = nobs - npar;
    let bounds = ChiSquareBounds::new(dof, opts.alpha)?;

    let mut state = IrlsState::initial(nobs);

    // weights that produced the retained residuals
    let (weights, step) = loop {
        let step = irls_step(a, l, &state, &bounds, opts.limit)?;
        if step.passed || step.next.iteration >= opts.max_iterations {
            break (state.weights, step);
        }
        state = step.next;
    };

    let mut floored = weights.map(|p| if p < f64::EPSILON { WEIGHT_FLOOR } else { p });

    let mut accepted = step
        .normalized
        .iter()
        .map(|s| *s <= opts.limit)
        .collect::<Vec<_>>();

    // iteration cap reached while failing: at least the worst offender is down-weighted
    if !step.passed && accepted.iter().all(|ok| *ok) {
        if let Some((worst, _)) = step
            .normalized
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
        {
            accepted[worst] = false;
            floored[worst] = WEIGHT_FLOOR;
        }
    }

    let (_, n_inv) = normal_solve(a, &floored, l)?;
    let sigmas = n_inv.diagonal().map(|q| step.so * q.abs().sqrt());

    Ok(IrlsSolution {
        solution: step.solution,
        residuals: step.residuals,
        normalized: step.normalized,
        so: step.so,
        factor: step.next.factor,
        iterations: step.next.iteration,
        passed: step.passed,
        weights,
        accepted,
        sigmas,
        dof,
    })
}
