//! Transactional station information facade, consumed by API layers
use log::info;

use crate::{
    cfg::GapOpts,
    events::{Event, EventSink},
    gaps::{GapDetector, GapReport},
    prelude::{Epoch, Error, HeightCodeTable, StationId, StationInfoRecord},
    store::{GapStore, ObservationSource, StationInfoStore},
    timeline::{InsertOutcome, RecordUpdate},
};

/// [StationInfoService] wraps every timeline mutation in a store transaction,
/// forwards audit events once committed and flags the station for gap recomputation.
/// Antenna heights are stored as DHARP.
pub struct StationInfoService<'a, S: StationInfoStore> {
    store: &'a S,
    observations: &'a dyn ObservationSource,
    gaps: &'a dyn GapStore,
    events: &'a dyn EventSink,
    heights: &'a HeightCodeTable,
    opts: GapOpts,
}

impl<'a, S: StationInfoStore> StationInfoService<'a, S> {
    /// Builds a new [StationInfoService].
    /// ## Returns
    /// - [Error::Config] when `opts` are not usable
    pub fn new(
        store: &'a S,
        observations: &'a dyn ObservationSource,
        gaps: &'a dyn GapStore,
        events: &'a dyn EventSink,
        heights: &'a HeightCodeTable,
        opts: GapOpts,
    ) -> Result<Self, Error> {
        opts.validate()?;
        Ok(Self {
            store,
            observations,
            gaps,
            events,
            heights,
            opts,
        })
    }

    /// Inserts new station information.
    /// ## Returns
    /// - [InsertOutcome]: record created or existing DateStart shifted
    /// - [Error::OverlapConflict] or [Error::DuplicateKey]
    /// - [Error::HeightCodeNotFound] when the antenna height cannot be converted to DHARP
    pub fn insert_station_info(
        &self,
        mut record: StationInfoRecord,
    ) -> Result<InsertOutcome, Error> {
        record.to_dharp(self.heights)?;
        let station = record.station.clone();
        let (outcome, events) = self.store.transaction(&station, |timeline| {
            let outcome = timeline.insert(record)?;
            Ok((outcome, timeline.take_events()))
        })?;

        info!("{}: {:?}", station, outcome);
        self.publish(&station, events);
        Ok(outcome)
    }

    /// Updates the record of `station` starting at `date_start`
    pub fn update_station_info(
        &self,
        station: &StationId,
        date_start: Epoch,
        update: &RecordUpdate,
    ) -> Result<(), Error> {
        let events = self.store.transaction(station, |timeline| {
            let update = match &update.equipment {
                Some(equipment) => {
                    let current = timeline
                        .records()
                        .iter()
                        .find(|r| r.date_start == date_start)
                        .ok_or_else(|| Error::RecordNotFound(station.clone(), date_start))?;

                    let mut normalized = current.clone();
                    normalized.equipment = equipment.clone();
                    if let Some(comments) = &update.comments {
                        normalized.comments = comments.clone();
                    }
                    normalized.to_dharp(self.heights)?;

                    update
                        .with_equipment(normalized.equipment)
                        .with_comments(&normalized.comments)
                },
                None => update.clone(),
            };
            timeline.update(date_start, &update)?;
            Ok(timeline.take_events())
        })?;
        self.publish(station, events);
        Ok(())
    }

    /// Deletes the record of `station` starting at `date_start`
    pub fn delete_station_info(
        &self,
        station: &StationId,
        date_start: Epoch,
    ) -> Result<StationInfoRecord, Error> {
        let (record, events) = self.store.transaction(station, |timeline| {
            let record = timeline.delete(date_start)?;
            Ok((record, timeline.take_events()))
        })?;
        self.publish(station, events);
        Ok(record)
    }

    /// Gap detection pass on committed data
    pub fn compute_gaps(&self, station: &StationId) -> Result<GapReport, Error> {
        let timeline = self.store.timeline(station)?;
        let observations = self.observations.observations(station)?;
        GapDetector::new(self.opts).compute_gaps(&timeline, &observations)
    }

    fn publish(&self, station: &StationId, events: Vec<Event>) {
        for event in events {
            self.events.record_event(event);
        }
        self.gaps.mark_dirty(station);
    }
}
