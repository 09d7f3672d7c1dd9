//! External reference frame constraints: the stack inherits positions,
//! velocities and seasonal signals of a parent frame for the stations both share.
use log::{info, warn};
use nalgebra::Vector3;

use crate::{
    adjustment::IrlsSolution,
    cfg::IrlsOpts,
    etm::{Etm, PeriodicTerm},
    helmert::Helmert,
    polyhedron::{fit_helmert, Polyhedron},
    position::Position,
    prelude::{Epoch, Error, StationId},
    time::fyear,
};

/// Parent frame coordinates of one station
#[derive(Debug, Clone, PartialEq)]
pub struct StationConstraint {
    pub station: StationId,
    /// ECEF position at the reference epoch (meters)
    pub position: Vector3<f64>,
    /// ECEF velocity (m/yr)
    pub velocity: Vector3<f64>,
    /// Seasonal terms, phase referenced to the frame reference epoch
    pub periodic: Vec<PeriodicTerm>,
}

/// Parent frame the stack should be expressed in
#[derive(Debug, Clone, PartialEq)]
pub struct FrameConstraints {
    /// Frame label, like "IGb14"
    pub frame: String,
    pub reference_epoch: Epoch,
    pub stations: Vec<StationConstraint>,
}

impl FrameConstraints {
    pub fn new(frame: &str, reference_epoch: Epoch) -> Self {
        Self {
            frame: frame.to_string(),
            reference_epoch,
            stations: Vec::new(),
        }
    }

    /// Adds one station constraint
    pub fn with_station(
        &self,
        station: StationId,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> Self {
        let mut s = self.clone();
        s.stations.push(StationConstraint {
            station,
            position,
            velocity,
            periodic: Vec::new(),
        });
        s
    }

    /// Adds one seasonal term to a constrained station
    pub fn with_periodic(&self, station: &StationId, term: PeriodicTerm) -> Self {
        let mut s = self.clone();
        if let Some(constraint) = s.stations.iter_mut().find(|c| &c.station == station) {
            constraint.periodic.push(term);
        }
        s
    }
}

/// Seasonal substitution of one station: parent terms replace the stack terms
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicCorrection {
    pub station: StationId,
    origin: Position,
    /// Parent terms followed by the negated stack terms
    pub terms: Vec<PeriodicTerm>,
}

impl PeriodicCorrection {
    /// ECEF correction at `t`
    pub fn ecef(&self, t: Epoch, reference: Epoch) -> Vector3<f64> {
        let neu = self
            .terms
            .iter()
            .fold(Vector3::zeros(), |acc, term| acc + term.evaluate(t, reference));
        self.origin.rotate_neu(&neu)
    }
}

/// Transformation of the stack onto the parent frame:
/// `H(t) = H0 + Ḣ.(t - t_ref)`, t in years.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAlignment {
    pub frame: String,
    pub reference_epoch: Epoch,
    /// Transformation at the reference epoch
    pub position: Helmert,
    /// Transformation rate (per year)
    pub rate: Helmert,
    /// Weighted RMS of the position fit (mm)
    pub position_wrms_mm: f64,
    /// Weighted RMS of the velocity fit (mm/yr)
    pub velocity_wrms_mm: f64,
    /// Constrained stations that took part
    pub stations: Vec<StationId>,
    /// Stations with at least one component down-weighted
    pub rejected: Vec<StationId>,
    /// Seasonal substitutions
    pub periodic: Vec<PeriodicCorrection>,
}

impl FrameAlignment {
    /// Transformation to apply at `t`
    pub fn at(&self, t: Epoch) -> Helmert {
        let dt = fyear(t) - fyear(self.reference_epoch);
        self.position.compose(&self.rate.scaled(dt))
    }
}

fn rejected(stations: &[StationId], adj: &IrlsSolution) -> Vec<StationId> {
    stations
        .iter()
        .enumerate()
        .filter(|(i, _)| !(0..3).all(|k| adj.accepted[3 * i + k]))
        .map(|(_, station)| station.clone())
        .collect()
}

/// Estimates the 14 parameter transformation (7 on positions, 7 rates on velocities)
/// from the stack trajectories onto the parent frame.
/// ## Input
/// - etms: final trajectories of the stack
/// - constraints: [FrameConstraints]
/// - opts: [IrlsOpts]
pub fn estimate_frame_alignment(
    etms: &[Etm],
    constraints: &FrameConstraints,
    opts: &IrlsOpts,
) -> Result<FrameAlignment, Error> {
    let t_ref = constraints.reference_epoch;

    let mut stations = Vec::new();
    let mut points = Vec::new();
    let mut dpos = Vec::new();
    let mut dvel = Vec::new();
    let mut periodic = Vec::new();

    for constraint in constraints.stations.iter() {
        let Some(etm) = etms.iter().find(|etm| etm.station == constraint.station) else {
            continue;
        };
        let position = etm.evaluate(t_ref);
        stations.push(constraint.station.clone());
        points.push(position);
        dpos.push(constraint.position - position);
        dvel.push(constraint.velocity - etm.velocity_xyz());

        if !constraint.periodic.is_empty() {
            let terms = constraint
                .periodic
                .iter()
                .copied()
                .chain(etm.periodic_terms(t_ref).iter().map(|term| term.negated()))
                .collect();
            periodic.push(PeriodicCorrection {
                station: constraint.station.clone(),
                origin: etm.origin,
                terms,
            });
        }
    }

    let (pos_adj, position) = fit_helmert(&points, &dpos, opts)?;
    let (vel_adj, rate) = fit_helmert(&points, &dvel, opts)?;

    let mut rejected_stations = rejected(&stations, &pos_adj);
    for station in rejected(&stations, &vel_adj) {
        if !rejected_stations.contains(&station) {
            rejected_stations.push(station);
        }
    }

    if !rejected_stations.is_empty() {
        warn!(
            "{}: {} constrained stations down-weighted",
            constraints.frame,
            rejected_stations.len()
        );
    }

    Ok(FrameAlignment {
        frame: constraints.frame.clone(),
        reference_epoch: t_ref,
        position,
        rate,
        position_wrms_mm: pos_adj.wrms() * 1.0E3,
        velocity_wrms_mm: vel_adj.wrms() * 1.0E3,
        stations,
        rejected: rejected_stations,
        periodic,
    })
}

/// Expresses every [Polyhedron] in the parent frame
pub fn align_to_frame(polyhedra: &mut [Polyhedron], alignment: &FrameAlignment) {
    for polyhedron in polyhedra.iter_mut() {
        polyhedron.transform(&alignment.at(polyhedron.date));
        for correction in alignment.periodic.iter() {
            let shift = correction.ecef(polyhedron.date, alignment.reference_epoch);
            if let Some(vertex) = polyhedron
                .vertices
                .iter_mut()
                .find(|v| v.station == correction.station)
            {
                vertex.xyz += shift;
            }
        }
    }
    info!(
        "{}: {} polyhedrons aligned ({} stations, wrms={:.2}mm {:.2}mm/yr)",
        alignment.frame,
        polyhedra.len(),
        alignment.stations.len(),
        alignment.position_wrms_mm,
        alignment.velocity_wrms_mm
    );
}
