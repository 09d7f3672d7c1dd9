use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHI2_ALPHA, DEFAULT_IRLS_MAX_ITERATIONS, DEFAULT_OUTLIER_LIMIT};

/// Configuration Error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("completion threshold {0} not within [0, 1]")]
    InvalidCompletion(f64),
    #[error("outlier limit must be positive")]
    InvalidOutlierLimit,
    #[error("chi-square significance {0} not within ]0, 1[")]
    InvalidSignificance(f64),
    #[error("at least one iteration is required")]
    NoIterations,
    #[error("at least one worker is required")]
    NoWorkers,
    #[error("invalid periodic term: {0} days")]
    InvalidPeriod(f64),
}

fn default_min_completion() -> f64 {
    0.5
}

fn default_interior_gap_seconds() -> f64 {
    1.0
}

fn default_cluster_threshold_seconds() -> f64 {
    5.0
}

fn default_lock_timeout_seconds() -> f64 {
    3600.0
}

fn default_limit() -> f64 {
    DEFAULT_OUTLIER_LIMIT
}

fn default_max_iterations() -> usize {
    DEFAULT_IRLS_MAX_ITERATIONS
}

fn default_alpha() -> f64 {
    DEFAULT_CHI2_ALPHA
}

fn default_estimate_scale() -> bool {
    true
}

fn default_periods_days() -> Vec<f64> {
    vec![365.25, 182.625]
}

fn default_relaxation_days() -> Vec<f64> {
    vec![0.5]
}

fn default_min_epochs() -> usize {
    4
}

fn default_stack_iterations() -> usize {
    4
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Gap detection options
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GapOpts {
    /// Observation files below this completion ratio are ignored (inclusive threshold)
    #[cfg_attr(feature = "serde", serde(default = "default_min_completion"))]
    pub min_completion: f64,
    /// Consecutive records further apart than this (strictly) delimit a gap
    #[cfg_attr(feature = "serde", serde(default = "default_interior_gap_seconds"))]
    pub interior_gap_seconds: f64,
    /// Observation groups closer than this are clustered together for review
    #[cfg_attr(feature = "serde", serde(default = "default_cluster_threshold_seconds"))]
    pub cluster_threshold_seconds: f64,
    /// Batch update token expiry
    #[cfg_attr(feature = "serde", serde(default = "default_lock_timeout_seconds"))]
    pub lock_timeout_seconds: f64,
}

impl Default for GapOpts {
    fn default() -> Self {
        Self {
            min_completion: default_min_completion(),
            interior_gap_seconds: default_interior_gap_seconds(),
            cluster_threshold_seconds: default_cluster_threshold_seconds(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
        }
    }
}

impl GapOpts {
    pub fn with_min_completion(&self, min_completion: f64) -> Self {
        let mut s = *self;
        s.min_completion = min_completion;
        s
    }

    pub fn with_cluster_threshold_seconds(&self, seconds: f64) -> Self {
        let mut s = *self;
        s.cluster_threshold_seconds = seconds;
        s
    }

    /// Verifies these [GapOpts] are usable
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.min_completion) {
            return Err(Error::InvalidCompletion(self.min_completion));
        }
        Ok(())
    }
}

/// Robust (iteratively reweighted) least squares options
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IrlsOpts {
    /// Normalized residual beyond which observations get down-weighted
    #[cfg_attr(feature = "serde", serde(default = "default_limit"))]
    pub limit: f64,
    /// Maximal number of reweighting iterations
    #[cfg_attr(feature = "serde", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// Two sided significance of the Chi-square variance test
    #[cfg_attr(feature = "serde", serde(default = "default_alpha"))]
    pub alpha: f64,
    /// Estimate the scale factor (7 parameters) or hold it fixed (6 parameters)
    #[cfg_attr(feature = "serde", serde(default = "default_estimate_scale"))]
    pub estimate_scale: bool,
}

impl Default for IrlsOpts {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            max_iterations: default_max_iterations(),
            alpha: default_alpha(),
            estimate_scale: default_estimate_scale(),
        }
    }
}

impl IrlsOpts {
    /// Copies and returns without scale estimation (6 parameters)
    pub fn without_scale(&self) -> Self {
        let mut s = *self;
        s.estimate_scale = false;
        s
    }
}

/// Trajectory model options
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EtmOpts {
    /// Outlier limit, in units of the adjustment sigma
    #[cfg_attr(feature = "serde", serde(default = "default_limit"))]
    pub limit: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// Periodic terms, in days. Only fitted when the data span covers the period.
    #[cfg_attr(feature = "serde", serde(default = "default_periods_days"))]
    pub periods_days: Vec<f64>,
    /// Relaxation times (days) of post-seismic logarithmic decays
    #[cfg_attr(feature = "serde", serde(default = "default_relaxation_days"))]
    pub relaxation_days: Vec<f64>,
    /// Jumps need this many epochs on each side to be estimated
    #[cfg_attr(feature = "serde", serde(default = "default_min_epochs"))]
    pub min_epochs_per_jump: usize,
}

impl Default for EtmOpts {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            max_iterations: default_max_iterations(),
            periods_days: default_periods_days(),
            relaxation_days: default_relaxation_days(),
            min_epochs_per_jump: default_min_epochs(),
        }
    }
}

impl EtmOpts {
    /// [IrlsOpts] used by each component adjustment
    pub(crate) fn irls(&self) -> IrlsOpts {
        IrlsOpts {
            limit: self.limit,
            max_iterations: self.max_iterations,
            ..Default::default()
        }
    }
}

/// Stacking options
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StackOpts {
    /// Number of outer (target recomputation) iterations
    #[cfg_attr(feature = "serde", serde(default = "default_stack_iterations"))]
    pub max_iters: usize,
    /// Worker threads
    #[cfg_attr(feature = "serde", serde(default = "default_workers"))]
    pub workers: usize,
}

impl Default for StackOpts {
    fn default() -> Self {
        Self {
            max_iters: default_stack_iterations(),
            workers: default_workers(),
        }
    }
}

/// [Config] gathers all processing options
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    #[cfg_attr(feature = "serde", serde(default))]
    pub gap: GapOpts,
    #[cfg_attr(feature = "serde", serde(default))]
    pub irls: IrlsOpts,
    #[cfg_attr(feature = "serde", serde(default))]
    pub etm: EtmOpts,
    #[cfg_attr(feature = "serde", serde(default))]
    pub stack: StackOpts,
}

impl Config {
    /// Copies and returns with [GapOpts]
    pub fn with_gap_opts(&self, opts: GapOpts) -> Self {
        let mut s = self.clone();
        s.gap = opts;
        s
    }

    /// Copies and returns with [IrlsOpts]
    pub fn with_irls_opts(&self, opts: IrlsOpts) -> Self {
        let mut s = self.clone();
        s.irls = opts;
        s
    }

    /// Copies and returns with [EtmOpts]
    pub fn with_etm_opts(&self, opts: EtmOpts) -> Self {
        let mut s = self.clone();
        s.etm = opts;
        s
    }

    /// Copies and returns with this many worker threads
    pub fn with_workers(&self, workers: usize) -> Self {
        let mut s = self.clone();
        s.stack.workers = workers;
        s
    }

    /// Copies and returns with this many outer stacking iterations
    pub fn with_stack_iterations(&self, max_iters: usize) -> Self {
        let mut s = self.clone();
        s.stack.max_iters = max_iters;
        s
    }

    /// Verifies this [Config] is usable
    pub fn validate(&self) -> Result<(), Error> {
        self.gap.validate()?;
        for limit in [self.irls.limit, self.etm.limit] {
            if limit <= 0.0 {
                return Err(Error::InvalidOutlierLimit);
            }
        }
        if self.irls.alpha <= 0.0 || self.irls.alpha >= 1.0 {
            return Err(Error::InvalidSignificance(self.irls.alpha));
        }
        if self.irls.max_iterations == 0
            || self.etm.max_iterations == 0
            || self.stack.max_iters == 0
        {
            return Err(Error::NoIterations);
        }
        if self.stack.workers == 0 {
            return Err(Error::NoWorkers);
        }
        if let Some(period) = self
            .etm
            .periods_days
            .iter()
            .chain(self.etm.relaxation_days.iter())
            .find(|p| **p <= 0.0)
        {
            return Err(Error::InvalidPeriod(*period));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.gap.min_completion, 0.5);
        assert_eq!(cfg.irls.limit, 2.5);
        assert_eq!(cfg.irls.max_iterations, 10);
        assert_eq!(cfg.stack.max_iters, 4);
    }

    #[test]
    fn invalid_configs() {
        let cfg = Config::default().with_gap_opts(GapOpts::default().with_min_completion(1.5));
        assert_eq!(cfg.validate(), Err(Error::InvalidCompletion(1.5)));

        let cfg = Config::default().with_workers(0);
        assert_eq!(cfg.validate(), Err(Error::NoWorkers));

        let cfg = Config::default().with_stack_iterations(0);
        assert_eq!(cfg.validate(), Err(Error::NoIterations));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_config() {
        let content = r#"{ "gap": { "min_completion": 0.8 }, "stack": { "max_iters": 2 } }"#;
        let cfg: Config = serde_json::from_str(content).unwrap();
        assert_eq!(cfg.gap.min_completion, 0.8);
        assert_eq!(cfg.gap.interior_gap_seconds, 1.0);
        assert_eq!(cfg.stack.max_iters, 2);
        assert_eq!(cfg.irls, IrlsOpts::default());
    }
}
