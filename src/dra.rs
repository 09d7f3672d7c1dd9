//! Daily repeatability analysis: every day of a [Stack] is fitted onto the
//! previous one, which measures the day to day scatter of the network.
use std::collections::BTreeMap;

use itertools::Itertools;
use log::{info, warn};

use crate::{
    averager::Averager,
    cfg::IrlsOpts,
    pool::WorkerPool,
    prelude::{Epoch, Error, StationId},
    stack::Stack,
};

/// Fit of one day onto the previous one
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRepeatability {
    pub date: Epoch,
    pub previous: Epoch,
    pub wrms_mm: f64,
    pub down_frac: f64,
    pub stations_used: usize,
    pub iterations: usize,
    pub passed: bool,
}

/// Residual statistics of one station over all days
#[derive(Debug, Clone, PartialEq)]
pub struct StationRepeatability {
    pub station: StationId,
    pub days: u64,
    /// Mean 3D residual (mm)
    pub mean_mm: f64,
    pub std_mm: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraReport {
    pub days: Vec<DailyRepeatability>,
    pub stations: Vec<StationRepeatability>,
}

/// Runs the daily repeatability analysis of this [Stack].
/// Day pairs that cannot be fitted are logged and skipped.
pub fn daily_repeatability(
    stack: &Stack,
    opts: &IrlsOpts,
    pool: &WorkerPool,
) -> Result<DraReport, Error> {
    let pairs = stack.polyhedra.iter().tuple_windows().collect::<Vec<_>>();

    let results = pool.map(pairs, |(previous, current)| {
        let fit = current.fit_vertices(&previous.vertices, opts);
        (previous.date, current.date, fit)
    })?;

    let mut report = DraReport::default();
    let mut per_station = BTreeMap::<StationId, Averager>::new();

    for (previous, date, fit) in results {
        let fit = match fit {
            Ok(fit) => fit,
            Err(e) => {
                warn!("{} {}: repeatability skipped: {}", stack.project, date, e);
                continue;
            },
        };

        for (station, norm) in fit.residual_norms() {
            per_station.entry(station).or_default().add(norm * 1.0E3);
        }

        let info = fit.info(date);
        report.days.push(DailyRepeatability {
            date,
            previous,
            wrms_mm: info.wrms_mm,
            down_frac: info.down_frac,
            stations_used: info.stations_used,
            iterations: info.iterations,
            passed: info.passed,
        });
    }

    report.stations = per_station
        .into_iter()
        .map(|(station, avg)| StationRepeatability {
            station,
            days: avg.count,
            mean_mm: avg.mean,
            std_mm: avg.std_dev(),
        })
        .collect();

    info!(
        "{}/{}: repeatability over {} days, {} stations",
        stack.project,
        stack.name,
        report.days.len(),
        report.stations.len()
    );

    Ok(report)
}
