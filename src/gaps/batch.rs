use log::{debug, error, info, warn};

use crate::{
    cfg::GapOpts,
    gaps::GapDetector,
    prelude::{Duration, Epoch, Error, StationId},
    store::{GapStatus, GapStore, LockGuard, LockProvider, ObservationSource, StationInfoStore},
};

/// Key of the global batch gap update token
pub const BATCH_GAP_LOCK: &str = "update_gaps_status";

/// Batch run statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// Stations whose gap rows were regenerated
    pub processed: usize,
    /// Stations found with gaps
    pub with_gaps: usize,
    /// Stations without any station information
    pub without_station_info: Vec<StationId>,
    /// Stations that could not be processed, left flagged for the next run
    pub failed: Vec<StationId>,
    /// Stations modified during this run, left flagged for the next run
    pub reflagged: Vec<StationId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Accepted(BatchSummary),
    /// Another instance is running: try again later
    RejectedAlreadyRunning,
}

/// [BatchGapUpdater] regenerates the gap rows of every station flagged "needs update".
/// At most one instance may run at any time, globally.
pub struct BatchGapUpdater<'a, S: StationInfoStore> {
    store: &'a S,
    observations: &'a dyn ObservationSource,
    gaps: &'a dyn GapStore,
    lock: &'a dyn LockProvider,
    opts: GapOpts,
}

impl<'a, S: StationInfoStore> BatchGapUpdater<'a, S> {
    /// Builds a new [BatchGapUpdater].
    /// ## Returns
    /// - [Error::Config] when `opts` are not usable
    pub fn new(
        store: &'a S,
        observations: &'a dyn ObservationSource,
        gaps: &'a dyn GapStore,
        lock: &'a dyn LockProvider,
        opts: GapOpts,
    ) -> Result<Self, Error> {
        opts.validate()?;
        Ok(Self {
            store,
            observations,
            gaps,
            lock,
            opts,
        })
    }

    /// Runs the batch update, unless another instance is running.
    pub fn trigger_batch_gap_update(&self, now: Epoch) -> Result<BatchOutcome, Error> {
        match self.update_gaps_status_for_all_needing_update(now) {
            Ok(summary) => Ok(BatchOutcome::Accepted(summary)),
            Err(Error::LockAlreadyHeld(key)) => {
                warn!("batch gap update rejected: \"{}\" held", key);
                Ok(BatchOutcome::RejectedAlreadyRunning)
            },
            Err(e) => Err(e),
        }
    }

    /// Regenerates gap rows of all flagged stations.
    /// ## Returns
    /// - [BatchSummary]
    /// - [Error::LockAlreadyHeld] if another instance is running
    pub fn update_gaps_status_for_all_needing_update(
        &self,
        now: Epoch,
    ) -> Result<BatchSummary, Error> {
        let timeout = Duration::from_seconds(self.opts.lock_timeout_seconds);
        let _guard = LockGuard::acquire(self.lock, BATCH_GAP_LOCK, timeout)?;

        let detector = GapDetector::new(self.opts);
        let mut summary = BatchSummary::default();

        for (station, generation) in self.gaps.dirty_stations() {
            let (timeline, observations) = match (
                self.store.timeline(&station),
                self.observations.observations(&station),
            ) {
                (Ok(timeline), Ok(observations)) => (timeline, observations),
                (Err(e), _) | (_, Err(e)) => {
                    error!("{}: gap update failed: {}", station, e);
                    summary.failed.push(station);
                    continue;
                },
            };

            let cleared = match detector.compute_gaps(&timeline, &observations) {
                Ok(report) => {
                    if report.has_gaps {
                        summary.with_gaps += 1;
                    }
                    let status = GapStatus {
                        has_gaps: report.has_gaps,
                        has_station_info: true,
                        last_updated: now,
                    };
                    self.gaps
                        .replace_gaps(&station, generation, report.gaps(), status)
                },
                Err(Error::NoStationInfo(_)) => {
                    let status = GapStatus {
                        has_gaps: false,
                        has_station_info: false,
                        last_updated: now,
                    };
                    summary.without_station_info.push(station.clone());
                    self.gaps
                        .replace_gaps(&station, generation, Vec::new(), status)
                },
                Err(e) => {
                    error!("{}: gap update failed: {}", station, e);
                    summary.failed.push(station);
                    continue;
                },
            };

            if !cleared {
                debug!("{}: modified during gap update, left flagged", station);
                summary.reflagged.push(station);
            }
            summary.processed += 1;
        }

        info!(
            "gap update: {} stations processed, {} with gaps, {} without station info",
            summary.processed,
            summary.with_gaps,
            summary.without_station_info.len()
        );
        Ok(summary)
    }
}
