//! Station information gap detection
use log::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    cfg::GapOpts,
    prelude::{Epoch, Equipment, Error, StationId, StationInfoRecord, StationInfoTimeline},
    time::seconds_between,
};

mod batch;
mod status;

pub use batch::{BatchGapUpdater, BatchOutcome, BatchSummary, BATCH_GAP_LOCK};
pub use status::{
    rinex_status_classification, MetadataMismatch, ObservationReport, ObservationStatus,
    SubGroup, SuperGroup,
};

/// Coverage of one observation file
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObservationInterval {
    pub station: StationId,
    /// First observation [Epoch]
    pub start: Epoch,
    /// Last observation [Epoch]
    pub end: Epoch,
    /// Completion ratio (0.0 to 1.0)
    pub completion: f64,
    /// Equipment declared in the file header, when known
    pub header: Option<Equipment>,
}

impl ObservationInterval {
    pub fn new(station: StationId, start: Epoch, end: Epoch, completion: f64) -> Self {
        Self {
            station,
            start,
            end,
            completion,
            header: None,
        }
    }

    /// Copies and returns with header [Equipment]
    pub fn with_header(&self, header: Equipment) -> Self {
        let mut s = self.clone();
        s.header = Some(header);
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GapKind {
    /// Between two consecutive records
    Interior,
    /// Observations prior the first record
    BeforeFirst,
    /// Observations after the last record
    AfterLast,
}

/// Derived [Gap]: observations not covered by station information
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gap {
    pub kind: GapKind,
    /// Number of qualifying observation files in this gap
    pub rinex_count: usize,
    /// Record ending the gap on the left
    pub left: Option<StationInfoRecord>,
    /// Record starting the gap on the right
    pub right: Option<StationInfoRecord>,
}

/// Result of one gap detection pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapReport {
    pub interior: Vec<Gap>,
    pub boundary: Vec<Gap>,
    pub has_gaps: bool,
}

impl GapReport {
    /// All gaps, interior first
    pub fn gaps(&self) -> Vec<Gap> {
        self.interior
            .iter()
            .chain(self.boundary.iter())
            .cloned()
            .collect()
    }
}

/// [GapDetector] confronts a [StationInfoTimeline] with observation coverage
#[derive(Debug, Clone, Copy, Default)]
pub struct GapDetector {
    opts: GapOpts,
}

impl GapDetector {
    pub fn new(opts: GapOpts) -> Self {
        Self { opts }
    }

    /// True if this observation file takes part in gap analysis
    pub fn qualifies(&self, obs: &ObservationInterval) -> bool {
        obs.completion >= self.opts.min_completion
    }

    fn qualifying<'a>(
        &self,
        observations: &'a [ObservationInterval],
    ) -> impl Iterator<Item = &'a ObservationInterval> + Clone {
        let min_completion = self.opts.min_completion;
        observations
            .iter()
            .filter(move |obs| obs.completion >= min_completion)
    }

    /// Gaps between consecutive records that contain qualifying observations
    pub fn interior_gaps(
        &self,
        timeline: &StationInfoTimeline,
        observations: &[ObservationInterval],
    ) -> Vec<Gap> {
        let qualifying = self.qualifying(observations);
        timeline
            .records()
            .windows(2)
            .filter_map(|pair| {
                let (prev, next) = (&pair[0], &pair[1]);
                let prev_end = prev.end_or_sentinel();

                let gap_s = seconds_between(prev_end, next.date_start);
                if gap_s <= self.opts.interior_gap_seconds {
                    return None;
                }

                let rinex_count = qualifying
                    .clone()
                    .filter(|obs| obs.end > prev_end && obs.start < next.date_start)
                    .count();

                if rinex_count == 0 {
                    return None;
                }

                debug!(
                    "{}: {} observations between {} and {}",
                    timeline.station(),
                    rinex_count,
                    prev_end,
                    next.date_start
                );

                Some(Gap {
                    kind: GapKind::Interior,
                    rinex_count,
                    left: Some(prev.clone()),
                    right: Some(next.clone()),
                })
            })
            .collect()
    }

    /// Qualifying observations prior the first record or after the last record
    pub fn boundary_gaps(
        &self,
        timeline: &StationInfoTimeline,
        observations: &[ObservationInterval],
    ) -> Vec<Gap> {
        let mut gaps = Vec::new();

        let (first, last) = match (timeline.first(), timeline.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return gaps,
        };

        let qualifying = self.qualifying(observations);

        let first_obs = qualifying.clone().map(|obs| obs.start).min();
        let last_obs = qualifying.clone().map(|obs| obs.end).max();

        if let Some(first_obs) = first_obs {
            if first_obs < first.date_start {
                let rinex_count = qualifying
                    .clone()
                    .filter(|obs| obs.start < first.date_start)
                    .count();
                gaps.push(Gap {
                    kind: GapKind::BeforeFirst,
                    rinex_count,
                    left: None,
                    right: Some(first.clone()),
                });
            }
        }

        if let Some(last_obs) = last_obs {
            let last_end = last.end_or_sentinel();
            if last_obs > last_end {
                let rinex_count = qualifying.filter(|obs| obs.end > last_end).count();
                gaps.push(Gap {
                    kind: GapKind::AfterLast,
                    rinex_count,
                    left: Some(last.clone()),
                    right: None,
                });
            }
        }

        gaps
    }

    /// Complete detection pass.
    /// ## Returns
    /// - [GapReport]
    /// - [Error::NoStationInfo] when the timeline is empty
    pub fn compute_gaps(
        &self,
        timeline: &StationInfoTimeline,
        observations: &[ObservationInterval],
    ) -> Result<GapReport, Error> {
        if timeline.is_empty() {
            return Err(Error::NoStationInfo(timeline.station().clone()));
        }

        let interior = self.interior_gaps(timeline, observations);
        let boundary = self.boundary_gaps(timeline, observations);
        let has_gaps = !interior.is_empty() || !boundary.is_empty();

        Ok(GapReport {
            interior,
            boundary,
            has_gaps,
        })
    }
}
