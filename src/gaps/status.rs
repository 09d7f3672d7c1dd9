use itertools::Itertools;

use crate::{
    cfg::GapOpts,
    gaps::ObservationInterval,
    prelude::{Epoch, Equipment, StationInfoTimeline},
    time::seconds_between,
};

/// Position of one observation file with respect to the timeline
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationStatus {
    /// Entirely covered by the record starting at this [Epoch]
    Contained(Epoch),
    /// Straddles several records (records DateStart): ambiguous
    SpansMultiple(Vec<Epoch>),
    /// (Partly) prior the first record
    BeforeFirst,
    /// (Partly) after the last record
    AfterLast,
    /// (Partly) in between two records (left DateStart, right DateStart)
    Between(Epoch, Epoch),
    /// Station has no information at all
    NoStationInfo,
}

/// Header field disagreeing with the station information
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataMismatch {
    pub field: &'static str,
    /// Value found in the observation header
    pub observed: String,
    /// Value found in the station information
    pub expected: String,
}

/// Per observation diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationReport {
    pub observation: ObservationInterval,
    pub status: ObservationStatus,
    pub mismatches: Vec<MetadataMismatch>,
}

/// Observations sharing identical (start, end)
#[derive(Debug, Clone, PartialEq)]
pub struct SubGroup {
    pub start: Epoch,
    pub end: Epoch,
    pub observations: Vec<ObservationReport>,
}

/// Adjacent [SubGroup]s closer than the clustering threshold
#[derive(Debug, Clone, PartialEq)]
pub struct SuperGroup {
    pub start: Epoch,
    pub end: Epoch,
    pub groups: Vec<SubGroup>,
}

fn mismatches(header: &Equipment, expected: &Equipment) -> Vec<MetadataMismatch> {
    [
        ("receiver code", &header.receiver_code, &expected.receiver_code),
        ("receiver serial", &header.receiver_serial, &expected.receiver_serial),
        ("receiver firmware", &header.receiver_firmware, &expected.receiver_firmware),
        ("antenna code", &header.antenna_code, &expected.antenna_code),
        ("antenna serial", &header.antenna_serial, &expected.antenna_serial),
        ("radome code", &header.radome_code, &expected.radome_code),
    ]
    .into_iter()
    .filter(|(_, observed, expected)| {
        !observed.trim().eq_ignore_ascii_case(expected.trim())
    })
    .map(|(field, observed, expected)| MetadataMismatch {
        field,
        observed: observed.clone(),
        expected: expected.clone(),
    })
    .collect()
}

fn classify(timeline: &StationInfoTimeline, obs: &ObservationInterval) -> ObservationStatus {
    let (first, last) = match (timeline.first(), timeline.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return ObservationStatus::NoStationInfo,
    };

    if let Some(record) = timeline
        .records()
        .iter()
        .find(|r| r.date_start <= obs.start && obs.end <= r.end_or_sentinel())
    {
        return ObservationStatus::Contained(record.date_start);
    }

    let touched = timeline.records_between(obs.start, obs.end);
    if touched.len() > 1 {
        return ObservationStatus::SpansMultiple(touched.iter().map(|r| r.date_start).collect());
    }

    if obs.start < first.date_start {
        return ObservationStatus::BeforeFirst;
    }
    if obs.end > last.end_or_sentinel() {
        return ObservationStatus::AfterLast;
    }

    // within the timeline span but not covered: locate the surrounding records
    let records = timeline.records();
    let right_idx = records
        .iter()
        .position(|r| r.date_start > obs.start)
        .unwrap_or(records.len() - 1)
        .max(1);
    ObservationStatus::Between(
        records[right_idx - 1].date_start,
        records[right_idx].date_start,
    )
}

/// Classifies every observation file against the timeline, flags header
/// mismatches, then groups identical (start, end) files and clusters
/// adjacent groups separated by less than `opts.cluster_threshold_seconds`.
pub fn rinex_status_classification(
    timeline: &StationInfoTimeline,
    observations: &[ObservationInterval],
    opts: &GapOpts,
) -> Vec<SuperGroup> {
    let reports = observations
        .iter()
        .sorted_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)))
        .map(|obs| {
            let status = classify(timeline, obs);
            let mismatches = match (&status, &obs.header) {
                (ObservationStatus::Contained(start), Some(header)) => timeline
                    .records()
                    .iter()
                    .find(|r| r.date_start == *start)
                    .map(|r| mismatches(header, &r.equipment))
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            ObservationReport {
                observation: obs.clone(),
                status,
                mismatches,
            }
        })
        .collect::<Vec<_>>();

    let subgroups = reports
        .into_iter()
        .chunk_by(|report| (report.observation.start, report.observation.end))
        .into_iter()
        .map(|((start, end), chunk)| SubGroup {
            start,
            end,
            observations: chunk.collect(),
        })
        .collect::<Vec<_>>();

    let mut clusters: Vec<SuperGroup> = Vec::new();
    for group in subgroups {
        let adjacent = clusters.last().is_some_and(|cluster| {
            seconds_between(cluster.end, group.start) < opts.cluster_threshold_seconds
        });
        if let Some(cluster) = clusters.last_mut().filter(|_| adjacent) {
            cluster.end = cluster.end.max(group.end);
            cluster.groups.push(group);
        } else {
            clusters.push(SuperGroup {
                start: group.start,
                end: group.end,
                groups: vec![group],
            });
        }
    }
    clusters
}
