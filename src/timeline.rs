//! Station information timeline: non overlapping equipment validity records
use itertools::Itertools;
use log::debug;

use crate::{
    events::Event,
    prelude::{Epoch, Equipment, Error, Interval, StationId, StationInfoRecord},
    time::one_second,
};

/// What [StationInfoTimeline::insert] actually did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertOutcome {
    /// Record inserted as proposed
    Added,
    /// Record inserted ahead of the timeline, closed one second
    /// before the previously earliest record.
    AddedBeforeFirst { date_end: Epoch },
    /// Record appended, previously open last record closed one second before it.
    AddedPreviousClosed { previous_end: Epoch },
    /// No record created: the earliest record, sharing the same equipment,
    /// now starts earlier.
    StartDateShifted { old: Epoch, new: Epoch },
}

impl InsertOutcome {
    /// True if a new record was created
    pub fn created(&self) -> bool {
        !matches!(self, Self::StartDateShifted { .. })
    }
}

/// Storage level change, applied by the store when the transaction commits
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(StationInfoRecord),
    /// Field update of the record identified by its DateStart
    Update(StationInfoRecord),
    /// DateStart is part of the record key
    Rekey { old: Epoch, new: Epoch },
    Delete(Epoch),
}

/// Partial update of a [StationInfoRecord]. Network and station codes
/// are immutable and therefore not part of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub date_start: Option<Epoch>,
    pub date_end: Option<Option<Epoch>>,
    pub equipment: Option<Equipment>,
    pub comments: Option<String>,
}

impl RecordUpdate {
    pub fn with_date_start(&self, t: Epoch) -> Self {
        let mut s = self.clone();
        s.date_start = Some(t);
        s
    }

    pub fn with_date_end(&self, t: Option<Epoch>) -> Self {
        let mut s = self.clone();
        s.date_end = Some(t);
        s
    }

    pub fn with_equipment(&self, equipment: Equipment) -> Self {
        let mut s = self.clone();
        s.equipment = Some(equipment);
        s
    }

    pub fn with_comments(&self, comments: &str) -> Self {
        let mut s = self.clone();
        s.comments = Some(comments.to_string());
        s
    }

    fn apply(&self, record: &StationInfoRecord) -> Result<StationInfoRecord, Error> {
        let merged = StationInfoRecord::new(
            record.station.clone(),
            self.date_start.unwrap_or(record.date_start),
            self.date_end.unwrap_or(record.date_end),
            self.equipment
                .clone()
                .unwrap_or_else(|| record.equipment.clone()),
        )?;
        Ok(merged.with_comments(self.comments.as_deref().unwrap_or(&record.comments)))
    }
}

/// [StationInfoTimeline] owns every [StationInfoRecord] of one station,
/// sorted by DateStart, and mediates all mutations through the overlap rules.
#[derive(Debug, Clone)]
pub struct StationInfoTimeline {
    station: StationId,
    records: Vec<StationInfoRecord>,
    changes: Vec<Change>,
    events: Vec<Event>,
}

impl StationInfoTimeline {
    /// Builds an empty [StationInfoTimeline]
    pub fn new(station: StationId) -> Self {
        Self {
            station,
            records: Vec::new(),
            changes: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Builds a [StationInfoTimeline] from committed records.
    /// Records are trusted to be consistent (they come from the store).
    pub fn from_records(station: StationId, records: Vec<StationInfoRecord>) -> Self {
        let mut s = Self::new(station);
        s.records = records
            .into_iter()
            .sorted_by(|a, b| a.date_start.cmp(&b.date_start))
            .collect();
        s
    }

    pub fn station(&self) -> &StationId {
        &self.station
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sorted by DateStart
    pub fn records(&self) -> &[StationInfoRecord] {
        &self.records
    }

    /// Earliest record
    pub fn first(&self) -> Option<&StationInfoRecord> {
        self.records.first()
    }

    /// Latest record
    pub fn last(&self) -> Option<&StationInfoRecord> {
        self.records.last()
    }

    /// Record valid at this [Epoch], if any
    pub fn record_at(&self, t: Epoch) -> Option<&StationInfoRecord> {
        self.records.iter().find(|r| r.contains(t))
    }

    /// Records valid at some point between `start` and `end`
    pub fn records_between(&self, start: Epoch, end: Epoch) -> Vec<&StationInfoRecord> {
        self.records
            .iter()
            .filter(|r| r.date_start <= end && r.end_or_sentinel() >= start)
            .collect()
    }

    /// Pending storage changes, drained by the store on commit
    pub fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }

    /// Pending audit events, to be forwarded once committed
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Returns every record overlapping `candidate`.
    /// `exclude_self` omits the record starting at this [Epoch].
    pub fn get_overlaps(
        &self,
        candidate: &StationInfoRecord,
        exclude_self: Option<Epoch>,
    ) -> Vec<&StationInfoRecord> {
        self.records
            .iter()
            .filter(|r| Some(r.date_start) != exclude_self)
            .filter(|r| r.overlaps(candidate))
            .collect()
    }

    fn sort(&mut self) {
        self.records.sort_by(|a, b| a.date_start.cmp(&b.date_start));
    }

    fn push(&mut self, record: StationInfoRecord, description: String) {
        self.events.push(Event::info(&self.station, description));
        self.changes.push(Change::Insert(record.clone()));
        self.records.push(record);
        self.sort();
    }

    /// Inserts a new [StationInfoRecord], reconciling it with the existing timeline.
    /// ## Input
    /// - record: proposed [StationInfoRecord]
    /// ## Returns
    /// - [InsertOutcome] describing what happened
    /// - [Error::DuplicateKey] when a record with identical DateStart exists
    /// - [Error::OverlapConflict] when no reconciliation path applies
    pub fn insert(&mut self, mut record: StationInfoRecord) -> Result<InsertOutcome, Error> {
        if record.station != self.station {
            return Err(Error::ForeignRecord(record.station));
        }
        record.validate()?;

        if self.records.iter().any(|r| r.date_start == record.date_start) {
            return Err(Error::DuplicateKey(self.station.clone(), record.date_start));
        }

        let overlaps = self
            .get_overlaps(&record, None)
            .into_iter()
            .map(|r| r.interval())
            .collect::<Vec<_>>();

        if overlaps.is_empty() {
            debug!("{}: new record {}", self.station, record.interval());
            let description = format!("station information added: {}", record.dump());
            self.push(record, description);
            return Ok(InsertOutcome::Added);
        }

        let (first, last) = match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => (first.clone(), last.clone()),
            _ => return Err(Error::OverlapConflict(overlaps)),
        };

        if overlaps.len() == self.records.len() && record.date_start < first.date_start {
            if record.equipment.same_setup(&first.equipment) {
                let (old, new) = (first.date_start, record.date_start);
                let mut shifted = first.clone();
                shifted.date_start = new;

                self.records[0] = shifted.clone();
                self.changes.push(Change::Rekey { old, new });
                self.events.push(Event::info(
                    &self.station,
                    format!("station information DateStart modified: {} -> {}", old, new),
                ));
                debug!("{}: DateStart shifted {} -> {}", self.station, old, new);
                return Ok(InsertOutcome::StartDateShifted { old, new });
            }

            let date_end = first.date_start - one_second();
            record.date_end = Some(date_end);
            let description = format!("station information added: {}", record.dump());
            self.push(record, description);
            return Ok(InsertOutcome::AddedBeforeFirst { date_end });
        }

        if overlaps.len() == 1
            && overlaps[0] == last.interval()
            && last.is_open()
            && record.date_start > last.date_start
        {
            let previous_end = record.date_start - one_second();
            let mut closed = last.clone();
            closed.date_end = Some(previous_end);

            let idx = self.records.len() - 1;
            self.records[idx] = closed.clone();
            self.changes.push(Change::Update(closed));

            let description = format!(
                "station information added, previous DateEnd set to {}: {}",
                previous_end,
                record.dump()
            );
            self.push(record, description);
            return Ok(InsertOutcome::AddedPreviousClosed { previous_end });
        }

        Err(Error::OverlapConflict(overlaps))
    }

    /// Updates the record starting at `original_start`.
    /// The updated record may not overlap any other record.
    pub fn update(&mut self, original_start: Epoch, update: &RecordUpdate) -> Result<(), Error> {
        let idx = self
            .records
            .iter()
            .position(|r| r.date_start == original_start)
            .ok_or_else(|| Error::RecordNotFound(self.station.clone(), original_start))?;

        let before = self.records[idx].clone();
        let after = update.apply(&before)?;

        if after.date_start != original_start
            && self.records.iter().any(|r| r.date_start == after.date_start)
        {
            return Err(Error::DuplicateKey(self.station.clone(), after.date_start));
        }

        let overlaps = self.get_overlaps(&after, Some(original_start));
        if !overlaps.is_empty() {
            return Err(Error::OverlapConflict(
                overlaps.into_iter().map(|r| r.interval()).collect(),
            ));
        }

        if after.date_start != original_start {
            self.changes.push(Change::Rekey {
                old: original_start,
                new: after.date_start,
            });
        }
        self.changes.push(Change::Update(after.clone()));
        self.events.push(Event::info(
            &self.station,
            format!(
                "station information updated. before: {} after: {}",
                before.dump(),
                after.dump()
            ),
        ));

        self.records[idx] = after;
        self.sort();
        Ok(())
    }

    /// Deletes the record starting at `date_start`
    pub fn delete(&mut self, date_start: Epoch) -> Result<StationInfoRecord, Error> {
        let idx = self
            .records
            .iter()
            .position(|r| r.date_start == date_start)
            .ok_or_else(|| Error::RecordNotFound(self.station.clone(), date_start))?;

        let record = self.records.remove(idx);
        self.changes.push(Change::Delete(date_start));
        self.events.push(Event::info(
            &self.station,
            format!("station information deleted: {}", record.dump()),
        ));
        Ok(record)
    }

    /// Every validity [Interval], sorted
    pub fn intervals(&self) -> Vec<Interval> {
        self.records.iter().map(|r| r.interval()).collect()
    }

    /// True if no two records overlap
    pub fn is_consistent(&self) -> bool {
        self.records
            .iter()
            .tuple_combinations()
            .all(|(a, b)| !a.overlaps(b))
    }
}
