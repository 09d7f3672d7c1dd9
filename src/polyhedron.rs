//! Daily network solution, aligned as a rigid body
use std::collections::HashMap;

use log::{debug, info};
use nalgebra::{DVector, Vector3};

use crate::{
    adjustment::{adjust, iqr, IrlsSolution},
    cfg::IrlsOpts,
    helmert::Helmert,
    prelude::{Epoch, Error, StationId},
    provider::DailySolution,
};

/// One station position of a [Polyhedron]
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub station: StationId,
    /// ECEF position (meters)
    pub xyz: Vector3<f64>,
    /// Formal uncertainty (meters)
    pub sigma: Vector3<f64>,
    /// False when flagged as outlier by the latest alignment
    pub accepted: bool,
}

impl Vertex {
    pub fn new(station: StationId, xyz: Vector3<f64>) -> Self {
        Self {
            station,
            xyz,
            sigma: Vector3::zeros(),
            accepted: true,
        }
    }
}

/// Summary of one [Polyhedron::align] call
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentInfo {
    pub date: Epoch,
    /// Transformation estimated by this call
    pub helmert: Helmert,
    /// Formal uncertainties of the estimated parameters
    pub sigmas: Vec<f64>,
    /// Weighted RMS of the residuals (mm)
    pub wrms_mm: f64,
    /// Reweighting iterations
    pub iterations: usize,
    /// Stations common to polyhedron and target
    pub stations_used: usize,
    /// Rejected / total observations
    pub down_frac: f64,
    /// Interquartile range of the residuals (mm)
    pub iqr_mm: f64,
    /// Variance test verdict
    pub passed: bool,
    /// Stations with at least one rejected component
    pub rejected: Vec<StationId>,
}

/// Robust [Helmert] fit of `observed` differences evaluated at `points`.
pub(crate) fn fit_helmert(
    points: &[Vector3<f64>],
    observed: &[Vector3<f64>],
    opts: &IrlsOpts,
) -> Result<(IrlsSolution, Helmert), Error> {
    let npar = Helmert::size(opts.estimate_scale);
    if 3 * points.len() <= npar {
        return Err(Error::InsufficientData {
            needed: npar + 1,
            got: 3 * points.len(),
        });
    }

    let a = Helmert::design_matrix(points, opts.estimate_scale);
    let l = DVector::from_iterator(
        3 * observed.len(),
        observed.iter().flat_map(|d| [d[0], d[1], d[2]]),
    );

    let adjustment = adjust(&a, &l, opts)?;
    let helmert = Helmert::from_parameters(&adjustment.solution);
    Ok((adjustment, helmert))
}

/// Raw fit of one polyhedron onto a target, prior to any mutation
#[derive(Debug, Clone)]
pub(crate) struct AlignmentFit {
    pub stations: Vec<StationId>,
    pub adjustment: IrlsSolution,
    pub helmert: Helmert,
}

impl AlignmentFit {
    /// Per station (3 components) residual norms, in meters
    pub fn residual_norms(&self) -> Vec<(StationId, f64)> {
        self.stations
            .iter()
            .enumerate()
            .map(|(i, station)| {
                let v = &self.adjustment.residuals;
                let norm = (v[3 * i].powi(2) + v[3 * i + 1].powi(2) + v[3 * i + 2].powi(2)).sqrt();
                (station.clone(), norm)
            })
            .collect()
    }

    pub fn info(&self, date: Epoch) -> AlignmentInfo {
        let adj = &self.adjustment;
        let residuals_mm = adj.residuals.iter().map(|v| v * 1.0E3).collect::<Vec<_>>();
        let rejected = self
            .stations
            .iter()
            .enumerate()
            .filter(|(i, _)| !(0..3).all(|k| adj.accepted[3 * i + k]))
            .map(|(_, station)| station.clone())
            .collect();
        AlignmentInfo {
            date,
            helmert: self.helmert,
            sigmas: adj.sigmas.iter().copied().collect(),
            wrms_mm: adj.wrms() * 1.0E3,
            iterations: adj.iterations,
            stations_used: self.stations.len(),
            down_frac: adj.down_frac(),
            iqr_mm: iqr(&residuals_mm),
            passed: adj.passed,
            rejected,
        }
    }
}

/// [Polyhedron]: one daily network solution.
/// UNALIGNED until the final outer stacking iteration aligns it (terminal).
#[derive(Debug, Clone)]
pub struct Polyhedron {
    pub project: String,
    /// Midnight of the solution day
    pub date: Epoch,
    /// Station positions, transformed by every alignment
    pub vertices: Vec<Vertex>,
    /// Cumulated transformation, from raw to current positions
    pub helmert: Helmert,
    /// Latest alignment summary
    pub info: Option<AlignmentInfo>,
    /// Variance factor of the daily solution
    pub variance_factor: f64,
    aligned: bool,
}

impl Polyhedron {
    /// Builds a new (unaligned) [Polyhedron]
    pub fn new(project: &str, date: Epoch, vertices: Vec<Vertex>) -> Self {
        Self {
            date,
            vertices,
            project: project.to_string(),
            helmert: Helmert::default(),
            info: None,
            variance_factor: 1.0,
            aligned: false,
        }
    }

    /// Builds a new [Polyhedron] from a daily network solution
    pub fn from_solutions(project: &str, date: Epoch, solutions: &[DailySolution]) -> Self {
        let vertices = solutions
            .iter()
            .filter(|sol| sol.date == date)
            .map(|sol| Vertex {
                station: sol.station.clone(),
                xyz: sol.xyz,
                sigma: sol.sigma,
                accepted: true,
            })
            .collect();
        Self::new(project, date, vertices)
    }

    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    /// Position of this station, if part of this [Polyhedron]
    pub fn vertex(&self, station: &StationId) -> Option<&Vertex> {
        self.vertices.iter().find(|v| &v.station == station)
    }

    pub fn stations(&self) -> impl Iterator<Item = &StationId> {
        self.vertices.iter().map(|v| &v.station)
    }

    /// Fits this [Polyhedron] onto `target` without modifying it.
    /// Only stations common to both take part.
    pub(crate) fn fit(&self, target: &Polyhedron, opts: &IrlsOpts) -> Result<AlignmentFit, Error> {
        if self.date != target.date {
            return Err(Error::DateMismatch {
                project: self.project.clone(),
                date: self.date,
                target: target.date,
            });
        }
        self.fit_vertices(&target.vertices, opts)
    }

    /// Fits this [Polyhedron] onto any set of vertices, regardless of their date.
    pub(crate) fn fit_vertices(
        &self,
        target: &[Vertex],
        opts: &IrlsOpts,
    ) -> Result<AlignmentFit, Error> {
        let target_xyz = target
            .iter()
            .map(|v| (&v.station, v.xyz))
            .collect::<HashMap<_, _>>();

        let (stations, points, observed): (Vec<_>, Vec<_>, Vec<_>) = self
            .vertices
            .iter()
            .filter_map(|v| {
                target_xyz
                    .get(&v.station)
                    .map(|xyz| (v.station.clone(), v.xyz, xyz - v.xyz))
            })
            .fold((vec![], vec![], vec![]), |mut acc, (station, xyz, dxyz)| {
                acc.0.push(station);
                acc.1.push(xyz);
                acc.2.push(dxyz);
                acc
            });

        let (adjustment, helmert) = fit_helmert(&points, &observed, opts)?;

        Ok(AlignmentFit {
            stations,
            adjustment,
            helmert,
        })
    }

    /// Applies an externally estimated transformation (frame constraints)
    /// to every vertex. Alignment state is left untouched.
    pub(crate) fn transform(&mut self, helmert: &Helmert) {
        for vertex in self.vertices.iter_mut() {
            vertex.xyz = helmert.apply(&vertex.xyz);
        }
        self.helmert = self.helmert.compose(helmert);
    }

    /// Aligns this [Polyhedron] onto `target`: estimates the transformation over the
    /// common stations and applies it to every vertex.
    /// ## Input
    /// - target: [Polyhedron] of the same day
    /// - final_iteration: marks this [Polyhedron] aligned (terminal)
    /// - opts: [IrlsOpts]
    /// ## Returns
    /// - [AlignmentInfo]
    /// - [Error::DateMismatch] if target is not of the same day
    pub fn align(
        &mut self,
        target: &Polyhedron,
        final_iteration: bool,
        opts: &IrlsOpts,
    ) -> Result<AlignmentInfo, Error> {
        if self.aligned {
            return Err(Error::AlreadyAligned(self.date));
        }

        let fit = self.fit(target, opts)?;
        let info = fit.info(self.date);

        for vertex in self.vertices.iter_mut() {
            vertex.xyz = fit.helmert.apply(&vertex.xyz);
            vertex.accepted = !info.rejected.contains(&vertex.station);
        }

        self.helmert = self.helmert.compose(&fit.helmert);

        debug!(
            "{} {}: {} wrms={:.2}mm it={} used={} down={:.3}",
            self.project,
            self.date,
            fit.helmert,
            info.wrms_mm,
            info.iterations,
            info.stations_used,
            info.down_frac
        );

        if final_iteration {
            self.aligned = true;
            info!(
                "{} {}: aligned (wrms={:.2}mm, {} stations)",
                self.project, self.date, info.wrms_mm, info.stations_used
            );
        }

        self.info = Some(info.clone());
        Ok(info)
    }
}
