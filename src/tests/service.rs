use std::sync::Mutex;

use crossbeam_utils::thread::scope;
use rstest::rstest;

use crate::prelude::{
    BatchGapUpdater, BatchOutcome, Duration, Equipment, Error, GapKind, GapOpts,
    GapStore, HeightCodeTable, InsertOutcome, LockProvider, MemoryGapStore, MemoryLock,
    MemoryObservations, MemorySink, MemoryStore, ObservationInterval, ObservationSource,
    RecordUpdate, StationId, StationInfoRecord, StationInfoService, StationInfoStore,
    BATCH_GAP_LOCK,
};
use crate::tests::{equipment, init_logger, record, station, utc, utc_hms};
use crate::ConfigError;

struct Backend {
    store: MemoryStore,
    observations: MemoryObservations,
    gaps: MemoryGapStore,
    events: MemorySink,
    lock: MemoryLock,
    heights: HeightCodeTable,
}

impl Backend {
    fn new() -> Self {
        Self {
            store: MemoryStore::default(),
            observations: MemoryObservations::default(),
            gaps: MemoryGapStore::default(),
            events: MemorySink::default(),
            lock: MemoryLock::default(),
            heights: HeightCodeTable::new(&[("TRM59800.00", "SLBCR", 0.1905, 0.0254)]),
        }
    }

    fn service(&self) -> StationInfoService<'_, MemoryStore> {
        StationInfoService::new(
            &self.store,
            &self.observations,
            &self.gaps,
            &self.events,
            &self.heights,
            GapOpts::default(),
        )
        .unwrap()
    }

    fn batch(&self) -> BatchGapUpdater<'_, MemoryStore> {
        self.batch_reading(&self.observations)
    }

    fn batch_reading<'a>(
        &'a self,
        observations: &'a dyn ObservationSource,
    ) -> BatchGapUpdater<'a, MemoryStore> {
        BatchGapUpdater::new(
            &self.store,
            observations,
            &self.gaps,
            &self.lock,
            GapOpts::default(),
        )
        .unwrap()
    }

    fn dirty(&self) -> Vec<StationId> {
        self.gaps
            .dirty_stations()
            .into_iter()
            .map(|(station, _)| station)
            .collect()
    }
}

/// Observation catalog that commits station information
/// while the batch updater is reading it.
struct CommitWhileReading<'a> {
    observations: &'a MemoryObservations,
    service: &'a StationInfoService<'a, MemoryStore>,
    pending: Mutex<Option<StationInfoRecord>>,
}

impl ObservationSource for CommitWhileReading<'_> {
    fn observations(&self, station: &StationId) -> Result<Vec<ObservationInterval>, Error> {
        let observations = self.observations.observations(station)?;
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(record) = pending {
            self.service.insert_station_info(record)?;
        }
        Ok(observations)
    }
}

#[rstest]
fn committed_inserts_and_events(station: StationId, equipment: Equipment) {
    init_logger();
    let backend = Backend::new();
    let service = backend.service();

    let a = record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment);
    assert_eq!(service.insert_station_info(a).unwrap(), InsertOutcome::Added);

    let b = record(&station, utc(2019, 1, 1), None, &equipment);
    assert_eq!(
        service.insert_station_info(b).unwrap(),
        InsertOutcome::StartDateShifted {
            old: utc(2020, 1, 1),
            new: utc(2019, 1, 1)
        }
    );

    let timeline = backend.store.timeline(&station).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.first().unwrap().date_start, utc(2019, 1, 1));
    assert_eq!(timeline.first().unwrap().date_end, Some(utc(2021, 1, 1)));

    let events = backend.events.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.station == station));
    assert_eq!(backend.dirty(), vec![station.clone()]);
}

#[rstest]
fn failed_insert_rolls_back(station: StationId, equipment: Equipment) {
    let backend = Backend::new();
    let service = backend.service();

    service
        .insert_station_info(record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment))
        .unwrap();
    service
        .insert_station_info(record(&station, utc(2023, 1, 1), None, &equipment))
        .unwrap();

    let conflicting = record(&station, utc(2020, 6, 1), Some(utc(2022, 1, 1)), &equipment);
    assert!(matches!(
        service.insert_station_info(conflicting),
        Err(Error::OverlapConflict(_))
    ));

    assert_eq!(backend.store.timeline(&station).unwrap().len(), 2);
    assert_eq!(backend.events.events().len(), 2);
}

#[rstest]
fn closing_previous_record_is_committed(station: StationId, equipment: Equipment) {
    let backend = Backend::new();
    let service = backend.service();

    service
        .insert_station_info(record(&station, utc(2020, 1, 1), None, &equipment))
        .unwrap();
    service
        .insert_station_info(record(&station, utc(2021, 1, 1), None, &equipment))
        .unwrap();

    let timeline = backend.store.timeline(&station).unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(
        timeline.records()[0].date_end,
        Some(utc_hms(2020, 12, 31, 23, 59, 59))
    );
    assert!(timeline.is_consistent());
}

#[rstest]
fn update_and_delete(station: StationId, equipment: Equipment) {
    let backend = Backend::new();
    let service = backend.service();

    service
        .insert_station_info(record(&station, utc(2020, 1, 1), None, &equipment))
        .unwrap();

    let update = RecordUpdate::default()
        .with_date_start(utc(2019, 6, 1))
        .with_date_end(Some(utc(2020, 6, 1)));
    service
        .update_station_info(&station, utc(2020, 1, 1), &update)
        .unwrap();

    let timeline = backend.store.timeline(&station).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.first().unwrap().date_start, utc(2019, 6, 1));
    assert_eq!(timeline.first().unwrap().date_end, Some(utc(2020, 6, 1)));

    let deleted = service.delete_station_info(&station, utc(2019, 6, 1)).unwrap();
    assert_eq!(deleted.date_start, utc(2019, 6, 1));
    assert!(backend.store.timeline(&station).unwrap().is_empty());
    assert_eq!(backend.events.events().len(), 3);
}

#[rstest]
fn gaps_through_the_service(station: StationId, equipment: Equipment) {
    let backend = Backend::new();
    let service = backend.service();

    service
        .insert_station_info(record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment))
        .unwrap();
    service
        .insert_station_info(record(&station, utc(2021, 1, 2), Some(utc(2022, 1, 1)), &equipment))
        .unwrap();

    for (start, end) in [(6, 12), (12, 18)] {
        backend.observations.add(ObservationInterval::new(
            station.clone(),
            utc_hms(2021, 1, 1, start, 0, 0),
            utc_hms(2021, 1, 1, end, 0, 0),
            0.9,
        ));
    }

    let report = service.compute_gaps(&station).unwrap();
    assert_eq!(report.interior.len(), 1);
    assert_eq!(report.interior[0].rinex_count, 2);
    assert_eq!(service.compute_gaps(&station).unwrap(), report);

    backend.observations.clear(&station);
    let report = service.compute_gaps(&station).unwrap();
    assert!(!report.has_gaps);
    assert!(report.interior.is_empty());
}

#[rstest]
fn batch_update_runs_once(station: StationId, equipment: Equipment) {
    init_logger();
    let backend = Backend::new();
    let service = backend.service();
    let batch = backend.batch();
    let now = utc(2024, 1, 1);

    service
        .insert_station_info(record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment))
        .unwrap();
    service
        .insert_station_info(record(&station, utc(2021, 1, 2), None, &equipment))
        .unwrap();
    backend.observations.add(ObservationInterval::new(
        station.clone(),
        utc_hms(2021, 1, 1, 6, 0, 0),
        utc_hms(2021, 1, 1, 12, 0, 0),
        1.0,
    ));

    let orphan = StationId::new("igs", "bogt");
    backend.gaps.mark_dirty(&orphan);

    // another instance is running
    assert!(backend
        .lock
        .acquire(BATCH_GAP_LOCK, Duration::from_seconds(60.0)));
    assert_eq!(
        batch.trigger_batch_gap_update(now).unwrap(),
        BatchOutcome::RejectedAlreadyRunning
    );
    assert_eq!(backend.dirty().len(), 2);
    backend.lock.release(BATCH_GAP_LOCK);

    let summary = match batch.trigger_batch_gap_update(now).unwrap() {
        BatchOutcome::Accepted(summary) => summary,
        BatchOutcome::RejectedAlreadyRunning => panic!("batch update rejected"),
    };

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.with_gaps, 1);
    assert_eq!(summary.without_station_info, vec![orphan.clone()]);
    assert!(summary.failed.is_empty());
    assert!(summary.reflagged.is_empty());

    assert!(backend.dirty().is_empty());
    assert_eq!(backend.gaps.gaps(&station).len(), 1);

    let status = backend.gaps.status(&station).unwrap();
    assert!(status.has_gaps);
    assert!(status.has_station_info);
    assert_eq!(status.last_updated, now);

    let status = backend.gaps.status(&orphan).unwrap();
    assert!(!status.has_gaps);
    assert!(!status.has_station_info);

    // token released on completion
    assert!(backend
        .lock
        .acquire(BATCH_GAP_LOCK, Duration::from_seconds(60.0)));
}

#[rstest]
fn antenna_heights_stored_as_dharp(station: StationId, equipment: Equipment) {
    let backend = Backend::new();
    let service = backend.service();

    let slant = Equipment {
        antenna_height: 1.2,
        height_code: "SLBCR".to_string(),
        ..equipment.clone()
    };
    service
        .insert_station_info(record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &slant))
        .unwrap();

    let stored = backend.store.timeline(&station).unwrap();
    let stored = stored.first().unwrap();
    let expected = (1.2_f64.powi(2) - 0.1905_f64.powi(2)).sqrt() - 0.0254;
    assert_eq!(stored.equipment.height_code, "DHARP");
    assert!((stored.equipment.antenna_height - expected).abs() < 1E-12);
    assert!(stored.comments.contains("SLBCR"));

    // same setup once converted: DateStart is shifted
    let dharp = Equipment {
        antenna_height: stored.equipment.antenna_height,
        ..equipment.clone()
    };
    assert_eq!(
        service
            .insert_station_info(record(&station, utc(2019, 1, 1), None, &dharp))
            .unwrap(),
        InsertOutcome::StartDateShifted {
            old: utc(2020, 1, 1),
            new: utc(2019, 1, 1)
        }
    );

    // updates are converted too
    let update = RecordUpdate::default().with_equipment(slant.clone());
    service
        .update_station_info(&station, utc(2019, 1, 1), &update)
        .unwrap();
    let stored = backend.store.timeline(&station).unwrap();
    assert_eq!(stored.first().unwrap().equipment.height_code, "DHARP");
}

#[rstest]
fn unknown_height_code(station: StationId, equipment: Equipment) {
    let backend = Backend::new();
    let service = backend.service();

    service
        .insert_station_info(record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment))
        .unwrap();

    let unknown = Equipment {
        antenna_height: 1.2,
        height_code: "DHPAB".to_string(),
        ..equipment.clone()
    };
    let expected = Error::HeightCodeNotFound {
        antenna: "TRM59800.00".to_string(),
        height_code: "DHPAB".to_string(),
    };

    assert_eq!(
        service.insert_station_info(record(&station, utc(2022, 1, 1), None, &unknown)),
        Err(expected.clone())
    );

    let update = RecordUpdate::default().with_equipment(unknown);
    assert_eq!(
        service.update_station_info(&station, utc(2020, 1, 1), &update),
        Err(expected)
    );

    let timeline = backend.store.timeline(&station).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.first().unwrap().equipment, equipment);
    assert_eq!(backend.events.events().len(), 1);
}

#[rstest]
fn concurrent_overlapping_inserts(station: StationId, equipment: Equipment) {
    init_logger();
    let backend = Backend::new();
    let service = backend.service();

    service
        .insert_station_info(record(&station, utc(2018, 1, 1), Some(utc(2018, 12, 31)), &equipment))
        .unwrap();

    // whichever commits first, the other one overlaps a closed last record
    let a = record(&station, utc(2020, 1, 1), Some(utc(2020, 12, 31)), &equipment);
    let b = record(&station, utc(2020, 6, 1), Some(utc(2021, 6, 1)), &equipment);

    let results = scope(|s| {
        let handles = [a, b].map(|rec| {
            let service = &service;
            s.spawn(move |_| service.insert_station_info(rec))
        });
        handles.map(|handle| handle.join().unwrap())
    })
    .unwrap();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::OverlapConflict(_))))
            .count(),
        1
    );

    let timeline = backend.store.timeline(&station).unwrap();
    assert_eq!(timeline.len(), 2);
    assert!(timeline.is_consistent());
}

#[rstest]
fn commit_during_batch_update_stays_flagged(station: StationId, equipment: Equipment) {
    init_logger();
    let backend = Backend::new();
    let service = backend.service();
    let now = utc(2024, 1, 1);

    service
        .insert_station_info(record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment))
        .unwrap();
    backend.observations.add(ObservationInterval::new(
        station.clone(),
        utc_hms(2021, 1, 1, 6, 0, 0),
        utc_hms(2021, 1, 1, 12, 0, 0),
        1.0,
    ));

    let source = CommitWhileReading {
        observations: &backend.observations,
        service: &service,
        pending: Mutex::new(Some(record(&station, utc(2021, 1, 2), None, &equipment))),
    };

    let summary = match backend.batch_reading(&source).trigger_batch_gap_update(now) {
        Ok(BatchOutcome::Accepted(summary)) => summary,
        other => panic!("unexpected batch outcome: {:?}", other),
    };

    // rows computed on the snapshot, station left flagged
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.reflagged, vec![station.clone()]);
    assert_eq!(backend.dirty(), vec![station.clone()]);
    let kinds = backend
        .gaps
        .gaps(&station)
        .iter()
        .map(|gap| gap.kind)
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec![GapKind::AfterLast]);

    // next run catches up
    let summary = match backend.batch().trigger_batch_gap_update(now) {
        Ok(BatchOutcome::Accepted(summary)) => summary,
        other => panic!("unexpected batch outcome: {:?}", other),
    };
    assert!(summary.reflagged.is_empty());
    assert!(backend.dirty().is_empty());
    let kinds = backend
        .gaps
        .gaps(&station)
        .iter()
        .map(|gap| gap.kind)
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec![GapKind::Interior]);
}

#[rstest]
fn invalid_gap_options(station: StationId) {
    let backend = Backend::new();
    let opts = GapOpts::default().with_min_completion(-0.1);

    assert!(matches!(
        StationInfoService::new(
            &backend.store,
            &backend.observations,
            &backend.gaps,
            &backend.events,
            &backend.heights,
            opts,
        ),
        Err(Error::Config(ConfigError::InvalidCompletion(_)))
    ));
    assert!(matches!(
        BatchGapUpdater::new(
            &backend.store,
            &backend.observations,
            &backend.gaps,
            &backend.lock,
            opts,
        ),
        Err(Error::Config(ConfigError::InvalidCompletion(_)))
    ));
    assert!(backend.store.timeline(&station).unwrap().is_empty());
}
