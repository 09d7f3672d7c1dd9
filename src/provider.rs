//! Upstream daily solutions (PPP, GAMIT network solutions)
use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Vector3;

use crate::prelude::{Epoch, Error, StationId};

/// One station position solved for one day
#[derive(Debug, Clone, PartialEq)]
pub struct DailySolution {
    pub station: StationId,
    /// Midnight of the solution day
    pub date: Epoch,
    /// ECEF position (meters)
    pub xyz: Vector3<f64>,
    /// Formal uncertainty (meters)
    pub sigma: Vector3<f64>,
    /// Reference frame label
    pub frame: String,
}

/// Provider of daily solutions: treated as an opaque upstream producer
pub trait DailySolutionProvider: Sync {
    /// Days for which a network solution exists
    fn dates(&self, project: &str) -> Result<Vec<Epoch>, Error>;

    /// Network solution of this project, for this day
    fn network_solution(&self, project: &str, date: Epoch) -> Result<Vec<DailySolution>, Error>;

    /// PPP time series of this station
    fn ppp_series(&self, station: &StationId) -> Result<Vec<DailySolution>, Error>;
}

/// In-memory [DailySolutionProvider]
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    network: BTreeMap<(String, Epoch), Vec<DailySolution>>,
    ppp: BTreeMap<StationId, Vec<DailySolution>>,
}

impl MemoryProvider {
    /// Adds one network solution of `project`
    pub fn add_network_solution(&mut self, project: &str, solution: DailySolution) {
        self.network
            .entry((project.to_string(), solution.date))
            .or_default()
            .push(solution);
    }

    /// Adds one PPP solution
    pub fn add_ppp_solution(&mut self, solution: DailySolution) {
        self.ppp
            .entry(solution.station.clone())
            .or_default()
            .push(solution);
    }
}

impl DailySolutionProvider for MemoryProvider {
    fn dates(&self, project: &str) -> Result<Vec<Epoch>, Error> {
        Ok(self
            .network
            .keys()
            .filter(|(p, _)| p == project)
            .map(|(_, date)| *date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    fn network_solution(&self, project: &str, date: Epoch) -> Result<Vec<DailySolution>, Error> {
        Ok(self
            .network
            .get(&(project.to_string(), date))
            .cloned()
            .unwrap_or_default())
    }

    fn ppp_series(&self, station: &StationId) -> Result<Vec<DailySolution>, Error> {
        Ok(self.ppp.get(station).cloned().unwrap_or_default())
    }
}
