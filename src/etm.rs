//! Extended trajectory model: constant, velocity, periodic, jump and
//! post-seismic decay terms, fitted per local (north, east, up) component.
use std::f64::consts::PI;

use itertools::Itertools;
use log::debug;
use nalgebra::{DMatrix, DVector, Vector3};

use crate::{
    adjustment::adjust,
    cfg::EtmOpts,
    constants::{DAYS_PER_YEAR, SECONDS_PER_DAY},
    position::Position,
    prelude::{Epoch, Error, StationId},
    provider::DailySolution,
    timeline::StationInfoTimeline,
};

/// Origin of a discontinuity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Equipment change: offset only
    Mechanical,
    /// Earthquake: offset and logarithmic relaxation
    Seismic,
}

/// Discontinuity of the trajectory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jump {
    pub epoch: Epoch,
    pub kind: JumpKind,
}

impl Jump {
    pub fn mechanical(epoch: Epoch) -> Self {
        Self {
            epoch,
            kind: JumpKind::Mechanical,
        }
    }

    pub fn seismic(epoch: Epoch) -> Self {
        Self {
            epoch,
            kind: JumpKind::Seismic,
        }
    }

    /// Mechanical jumps at every antenna change of this timeline
    pub fn from_timeline(timeline: &StationInfoTimeline) -> Vec<Self> {
        timeline
            .records()
            .iter()
            .tuple_windows()
            .filter(|(prev, next)| next.equipment.antenna_changed(&prev.equipment))
            .map(|(_, next)| Self::mechanical(next.date_start))
            .collect()
    }
}

/// Position time series of one station
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub station: StationId,
    /// Sorted, unique epochs
    pub epochs: Vec<Epoch>,
    /// ECEF positions (meters)
    pub xyz: Vec<Vector3<f64>>,
}

impl TimeSeries {
    pub fn new(station: StationId) -> Self {
        Self {
            station,
            epochs: Vec::new(),
            xyz: Vec::new(),
        }
    }

    /// Builds a [TimeSeries] from daily solutions of this station, sorted by date.
    /// Later duplicates of one date are dropped.
    pub fn from_solutions(station: &StationId, solutions: &[DailySolution]) -> Self {
        let mut series = Self::new(station.clone());
        for sol in solutions
            .iter()
            .filter(|sol| &sol.station == station)
            .sorted_by(|a, b| a.date.cmp(&b.date))
            .dedup_by(|a, b| a.date == b.date)
        {
            series.epochs.push(sol.date);
            series.xyz.push(sol.xyz);
        }
        series
    }

    /// Appends one position. Kept sorted.
    pub fn push(&mut self, epoch: Epoch, xyz: Vector3<f64>) {
        match self.epochs.binary_search(&epoch) {
            Ok(index) => self.xyz[index] = xyz,
            Err(index) => {
                self.epochs.insert(index, epoch);
                self.xyz.insert(index, xyz);
            },
        }
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

/// Seasonal signal of one period, in local (north, east, up) frame (meters):
/// `sin.sin(2π.d/P) + cos.cos(2π.d/P)`, d in days since a reference epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicTerm {
    pub period_days: f64,
    pub sin: Vector3<f64>,
    pub cos: Vector3<f64>,
}

impl PeriodicTerm {
    /// Local offset at `t`, phase referenced to `reference`
    pub fn evaluate(&self, t: Epoch, reference: Epoch) -> Vector3<f64> {
        let days = (t - reference).to_seconds() / SECONDS_PER_DAY;
        let (sin, cos) = (2.0 * PI * days / self.period_days).sin_cos();
        self.sin * sin + self.cos * cos
    }

    /// Opposite signal
    pub fn negated(&self) -> Self {
        Self {
            period_days: self.period_days,
            sin: -self.sin,
            cos: -self.cos,
        }
    }
}

/// One basis function
#[derive(Debug, Clone, Copy, PartialEq)]
enum Term {
    Constant,
    Velocity,
    Sin(f64),
    Cos(f64),
    Heaviside(Epoch),
    LogDecay(Epoch, f64),
}

impl Term {
    fn evaluate(&self, t: Epoch, t_ref: Epoch) -> f64 {
        let days = |from: Epoch| (t - from).to_seconds() / SECONDS_PER_DAY;
        match self {
            Self::Constant => 1.0,
            Self::Velocity => days(t_ref) / DAYS_PER_YEAR,
            Self::Sin(period) => (2.0 * PI * days(t_ref) / period).sin(),
            Self::Cos(period) => (2.0 * PI * days(t_ref) / period).cos(),
            Self::Heaviside(epoch) => {
                if t >= *epoch {
                    1.0
                } else {
                    0.0
                }
            },
            Self::LogDecay(epoch, relaxation) => {
                if t >= *epoch {
                    (1.0 + days(*epoch) / relaxation).ln()
                } else {
                    0.0
                }
            },
        }
    }
}

/// Basis functions retained for one series
#[derive(Debug, Clone, PartialEq)]
struct Design {
    t_ref: Epoch,
    terms: Vec<Term>,
}

impl Design {
    /// `t_ref` is the first epoch of `epochs`
    fn new(t_ref: Epoch, epochs: &[Epoch], jumps: &[Jump], opts: &EtmOpts) -> Self {
        let span_days = epochs
            .last()
            .map(|last| (*last - t_ref).to_seconds() / SECONDS_PER_DAY)
            .unwrap_or(0.0);

        let mut terms = vec![Term::Constant, Term::Velocity];

        for period in opts.periods_days.iter() {
            if span_days >= *period {
                terms.push(Term::Sin(*period));
                terms.push(Term::Cos(*period));
            }
        }

        for jump in jumps.iter().sorted_by(|a, b| a.epoch.cmp(&b.epoch)) {
            let before = epochs.iter().filter(|t| **t < jump.epoch).count();
            let after = epochs.len() - before;
            if before < opts.min_epochs_per_jump || after < opts.min_epochs_per_jump {
                debug!("jump {} not estimable ({}/{} epochs)", jump.epoch, before, after);
                continue;
            }
            terms.push(Term::Heaviside(jump.epoch));
            if jump.kind == JumpKind::Seismic {
                for relaxation in opts.relaxation_days.iter() {
                    terms.push(Term::LogDecay(jump.epoch, *relaxation));
                }
            }
        }

        Self { t_ref, terms }
    }

    fn row(&self, t: Epoch) -> DVector<f64> {
        DVector::from_iterator(
            self.terms.len(),
            self.terms.iter().map(|term| term.evaluate(t, self.t_ref)),
        )
    }

    fn matrix(&self, epochs: &[Epoch]) -> DMatrix<f64> {
        DMatrix::from_fn(epochs.len(), self.terms.len(), |i, j| {
            self.terms[j].evaluate(epochs[i], self.t_ref)
        })
    }
}

/// Fitted trajectory of one station
#[derive(Debug, Clone)]
pub struct Etm {
    pub station: StationId,
    /// Origin of the local frame (mean position)
    pub origin: Position,
    design: Design,
    /// Parameters per (north, east, up) component
    params: [DVector<f64>; 3],
    /// Formal parameter uncertainties per component
    sigmas: [DVector<f64>; 3],
    /// Fitted epochs
    pub epochs: Vec<Epoch>,
    /// NEU residuals (meters), per epoch
    pub residuals: Vec<Vector3<f64>>,
    /// True when at least one component was rejected at this epoch
    pub outliers: Vec<bool>,
    /// Weighted RMS per component (meters)
    pub wrms: Vector3<f64>,
}

impl Etm {
    /// Fits an [Etm] to this [TimeSeries].
    /// ## Input
    /// - series: [TimeSeries]
    /// - jumps: known discontinuities. Jumps without enough data on either side are ignored.
    /// - opts: [EtmOpts]
    /// ## Returns
    /// - [Etm]
    /// - [Error::InsufficientData] when observations do not exceed parameters
    pub fn fit(series: &TimeSeries, jumps: &[Jump], opts: &EtmOpts) -> Result<Self, Error> {
        let t_ref = series
            .epochs
            .first()
            .copied()
            .ok_or(Error::InsufficientData { needed: 3, got: 0 })?;

        let design = Design::new(t_ref, &series.epochs, jumps, opts);
        let npar = design.terms.len();

        if series.len() <= npar {
            return Err(Error::InsufficientData {
                needed: npar + 1,
                got: series.len(),
            });
        }

        let mean = series.xyz.iter().fold(Vector3::zeros(), |acc, x| acc + x) / series.len() as f64;
        let origin = Position::from_ecef(mean);
        let neu = series.xyz.iter().map(|x| origin.to_neu(x)).collect::<Vec<_>>();

        let a = design.matrix(&series.epochs);
        let irls = opts.irls();

        let mut params = [(); 3].map(|_| DVector::zeros(npar));
        let mut sigmas = [(); 3].map(|_| DVector::zeros(npar));
        let mut residuals = vec![Vector3::zeros(); series.len()];
        let mut outliers = vec![false; series.len()];
        let mut wrms = Vector3::zeros();

        for k in 0..3 {
            let l = DVector::from_iterator(series.len(), neu.iter().map(|x| x[k]));
            let adj = adjust(&a, &l, &irls)?;

            for (i, ok) in adj.accepted.iter().enumerate() {
                residuals[i][k] = adj.residuals[i];
                outliers[i] |= !ok;
            }

            wrms[k] = adj.wrms();
            params[k] = adj.solution;
            sigmas[k] = adj.sigmas;
        }

        debug!(
            "{}: etm {} params, {} epochs, {} outliers, wrms=({:.1}, {:.1}, {:.1})mm",
            series.station,
            npar,
            series.len(),
            outliers.iter().filter(|o| **o).count(),
            wrms[0] * 1.0E3,
            wrms[1] * 1.0E3,
            wrms[2] * 1.0E3,
        );

        Ok(Self {
            station: series.station.clone(),
            origin,
            design,
            params,
            sigmas,
            epochs: series.epochs.clone(),
            residuals,
            outliers,
            wrms,
        })
    }

    /// Number of estimated parameters per component
    pub fn size(&self) -> usize {
        self.design.terms.len()
    }

    /// Reference epoch of the model
    pub fn reference_epoch(&self) -> Epoch {
        self.design.t_ref
    }

    /// Modelled local (north, east, up) offset at `t`
    pub fn evaluate_neu(&self, t: Epoch) -> Vector3<f64> {
        let row = self.design.row(t);
        Vector3::new(
            row.dot(&self.params[0]),
            row.dot(&self.params[1]),
            row.dot(&self.params[2]),
        )
    }

    /// (north, east, up) coefficients of the j-th basis function
    fn coefficients(&self, j: usize) -> Vector3<f64> {
        Vector3::new(self.params[0][j], self.params[1][j], self.params[2][j])
    }

    /// Seasonal part of the model at `t`, local frame (meters)
    pub fn periodic_neu(&self, t: Epoch) -> Vector3<f64> {
        self.design
            .terms
            .iter()
            .enumerate()
            .filter(|(_, term)| matches!(term, Term::Sin(_) | Term::Cos(_)))
            .fold(Vector3::zeros(), |acc, (j, term)| {
                acc + self.coefficients(j) * term.evaluate(t, self.design.t_ref)
            })
    }

    /// Fitted seasonal terms, phase referenced to `reference`
    pub fn periodic_terms(&self, reference: Epoch) -> Vec<PeriodicTerm> {
        let delta_days = (reference - self.design.t_ref).to_seconds() / SECONDS_PER_DAY;
        self.design
            .terms
            .iter()
            .enumerate()
            .filter_map(|(j, term)| match term {
                // Cos(period) always follows Sin(period)
                Term::Sin(period) => {
                    let (a, b) = (self.coefficients(j), self.coefficients(j + 1));
                    let (sin, cos) = (2.0 * PI * delta_days / period).sin_cos();
                    Some(PeriodicTerm {
                        period_days: *period,
                        sin: a * cos - b * sin,
                        cos: a * sin + b * cos,
                    })
                },
                _ => None,
            })
            .collect()
    }

    /// Modelled ECEF position at `t`
    pub fn evaluate(&self, t: Epoch) -> Vector3<f64> {
        self.origin.from_neu(&self.evaluate_neu(t))
    }

    /// Velocity in local frame (m/yr)
    pub fn velocity_neu(&self) -> Vector3<f64> {
        Vector3::new(self.params[0][1], self.params[1][1], self.params[2][1])
    }

    /// Velocity uncertainty in local frame (m/yr)
    pub fn velocity_sigma_neu(&self) -> Vector3<f64> {
        Vector3::new(self.sigmas[0][1], self.sigmas[1][1], self.sigmas[2][1])
    }

    /// ECEF velocity (m/yr)
    pub fn velocity_xyz(&self) -> Vector3<f64> {
        self.origin.rotate_neu(&self.velocity_neu())
    }

    /// Estimated jump epochs
    pub fn jumps(&self) -> Vec<Epoch> {
        self.design
            .terms
            .iter()
            .filter_map(|term| match term {
                Term::Heaviside(epoch) => Some(*epoch),
                _ => None,
            })
            .collect()
    }

    /// True when `t` lies within the fitted data span
    pub fn covers(&self, t: Epoch) -> bool {
        match (self.epochs.first(), self.epochs.last()) {
            (Some(first), Some(last)) => t >= *first && t <= *last,
            _ => false,
        }
    }

    /// True when the observation at `t` was rejected
    pub fn is_outlier(&self, t: Epoch) -> bool {
        self.epochs
            .binary_search(&t)
            .is_ok_and(|i| self.outliers[i])
    }
}
