use rand::{rngs::SmallRng, Rng, SeedableRng};
use rstest::rstest;

use crate::{
    prelude::{
        Equipment, Error, InsertOutcome, Interval, RecordUpdate, StationId, StationInfoTimeline,
        Unit,
    },
    tests::{equipment, init_logger, record, station, utc, utc_hms},
};

#[rstest]
fn same_equipment_shifts_start_date(station: StationId, equipment: Equipment) {
    init_logger();
    let mut timeline = StationInfoTimeline::new(station.clone());

    let a = record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment);
    assert_eq!(timeline.insert(a).unwrap(), InsertOutcome::Added);

    let b = record(&station, utc(2019, 1, 1), None, &equipment);
    let outcome = timeline.insert(b).unwrap();

    assert_eq!(
        outcome,
        InsertOutcome::StartDateShifted {
            old: utc(2020, 1, 1),
            new: utc(2019, 1, 1),
        }
    );
    assert!(!outcome.created());
    assert_eq!(timeline.len(), 1);

    let first = timeline.first().unwrap();
    assert_eq!(first.date_start, utc(2019, 1, 1));
    assert_eq!(first.date_end, Some(utc(2021, 1, 1)));
}

#[rstest]
fn different_equipment_inserted_before_first(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::new(station.clone());

    let a = record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment);
    timeline.insert(a).unwrap();

    let other = Equipment {
        radome_code: "NONE".to_string(),
        ..equipment.clone()
    };
    let b = record(&station, utc(2018, 1, 1), None, &other);
    let outcome = timeline.insert(b).unwrap();

    let expected_end = utc_hms(2019, 12, 31, 23, 59, 59);
    assert_eq!(
        outcome,
        InsertOutcome::AddedBeforeFirst {
            date_end: expected_end
        }
    );
    assert_eq!(timeline.len(), 2);

    let first = timeline.first().unwrap();
    assert_eq!(first.date_start, utc(2018, 1, 1));
    assert_eq!(first.date_end, Some(expected_end));
    assert_eq!(first.equipment.radome_code, "NONE");
    assert!(timeline.is_consistent());
}

#[rstest]
fn open_last_record_gets_closed(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::new(station.clone());

    let a = record(&station, utc(2020, 1, 1), None, &equipment);
    timeline.insert(a).unwrap();

    let b = record(&station, utc(2021, 1, 1), None, &equipment);
    let outcome = timeline.insert(b).unwrap();

    let previous_end = utc_hms(2020, 12, 31, 23, 59, 59);
    assert_eq!(outcome, InsertOutcome::AddedPreviousClosed { previous_end });
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline.records()[0].date_end, Some(previous_end));
    assert!(timeline.records()[1].is_open());
    assert_eq!(timeline.last().unwrap().date_start, utc(2021, 1, 1));
}

#[rstest]
fn partial_overlap_is_rejected(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::new(station.clone());

    timeline
        .insert(record(&station, utc(2020, 1, 1), Some(utc(2021, 1, 1)), &equipment))
        .unwrap();
    timeline
        .insert(record(&station, utc(2023, 1, 1), None, &equipment))
        .unwrap();

    let b = record(&station, utc(2020, 6, 1), Some(utc(2022, 1, 1)), &equipment);
    let err = timeline.insert(b).unwrap_err();

    assert_eq!(
        err,
        Error::OverlapConflict(vec![Interval {
            start: utc(2020, 1, 1),
            end: Some(utc(2021, 1, 1)),
        }])
    );
    assert_eq!(timeline.len(), 2);

    // the conflicting interval is reported to the user
    assert!(err.to_string().contains("2020-01-01"));
}

#[rstest]
fn duplicate_date_start(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::new(station.clone());
    timeline
        .insert(record(&station, utc(2020, 1, 1), None, &equipment))
        .unwrap();
    assert_eq!(
        timeline.insert(record(&station, utc(2020, 1, 1), Some(utc(2020, 2, 1)), &equipment)),
        Err(Error::DuplicateKey(station.clone(), utc(2020, 1, 1)))
    );
}

#[rstest]
fn foreign_record(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::new(station.clone());
    let other = StationId::new("igs", "bogt");
    assert_eq!(
        timeline.insert(record(&other, utc(2020, 1, 1), None, &equipment)),
        Err(Error::ForeignRecord(other))
    );
}

#[rstest]
fn touching_records_do_not_overlap(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::new(station.clone());
    let a = record(
        &station,
        utc(2020, 1, 1),
        Some(utc_hms(2020, 12, 31, 23, 59, 59)),
        &equipment,
    );
    let b = record(&station, utc(2021, 1, 1), None, &equipment);

    assert!(!a.overlaps(&b));
    timeline.insert(a).unwrap();
    assert_eq!(timeline.insert(b).unwrap(), InsertOutcome::Added);
    assert_eq!(timeline.len(), 2);
}

#[rstest]
fn point_and_interval_queries(station: StationId, equipment: Equipment) {
    let timeline = StationInfoTimeline::from_records(
        station.clone(),
        vec![
            record(&station, utc(2021, 1, 1), None, &equipment),
            record(&station, utc(2020, 1, 1), Some(utc(2020, 6, 1)), &equipment),
        ],
    );

    assert_eq!(timeline.first().unwrap().date_start, utc(2020, 1, 1));
    assert_eq!(
        timeline.record_at(utc(2020, 3, 1)).unwrap().date_start,
        utc(2020, 1, 1)
    );
    assert!(timeline.record_at(utc(2020, 8, 1)).is_none());
    assert_eq!(
        timeline.record_at(utc(2030, 1, 1)).unwrap().date_start,
        utc(2021, 1, 1)
    );
    assert_eq!(timeline.records_between(utc(2020, 5, 1), utc(2021, 2, 1)).len(), 2);
    assert_eq!(timeline.records_between(utc(2020, 7, 1), utc(2020, 8, 1)).len(), 0);
}

#[rstest]
fn update_rekeys_and_checks_overlaps(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::from_records(
        station.clone(),
        vec![
            record(&station, utc(2020, 1, 1), Some(utc(2020, 6, 1)), &equipment),
            record(&station, utc(2021, 1, 1), None, &equipment),
        ],
    );

    // moving the second record into the first one is rejected
    let update = RecordUpdate::default().with_date_start(utc(2020, 5, 1));
    assert!(matches!(
        timeline.update(utc(2021, 1, 1), &update),
        Err(Error::OverlapConflict(_))
    ));

    // the record being updated does not conflict with itself
    let update = RecordUpdate::default()
        .with_date_start(utc(2020, 9, 1))
        .with_comments("antenna swap");
    timeline.update(utc(2021, 1, 1), &update).unwrap();
    assert_eq!(timeline.records()[1].date_start, utc(2020, 9, 1));
    assert_eq!(timeline.records()[1].comments, "antenna swap");

    let events = timeline.take_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].description.contains("before"));

    assert_eq!(
        timeline.update(utc(2019, 1, 1), &update),
        Err(Error::RecordNotFound(station.clone(), utc(2019, 1, 1)))
    );
}

#[rstest]
fn delete_record(station: StationId, equipment: Equipment) {
    let mut timeline = StationInfoTimeline::from_records(
        station.clone(),
        vec![record(&station, utc(2020, 1, 1), None, &equipment)],
    );
    let deleted = timeline.delete(utc(2020, 1, 1)).unwrap();
    assert_eq!(deleted.date_start, utc(2020, 1, 1));
    assert!(timeline.is_empty());
    assert_eq!(timeline.take_events().len(), 1);
    assert!(timeline.delete(utc(2020, 1, 1)).is_err());
}

#[rstest]
fn random_inserts_never_overlap(station: StationId, equipment: Equipment) {
    init_logger();
    let mut rng = SmallRng::seed_from_u64(42);
    let mut timeline = StationInfoTimeline::new(station.clone());
    let t0 = utc(2015, 1, 1);

    for _ in 0..300 {
        let start = t0 + (rng.random_range(0..3000) as f64) * Unit::Day;
        let end = if rng.random_bool(0.3) {
            None
        } else {
            Some(start + (rng.random_range(0..400) as f64) * Unit::Day)
        };
        let eq = Equipment {
            receiver_serial: format!("{}", rng.random_range(0..3)),
            ..equipment.clone()
        };
        let candidate = record(&station, start, end, &eq);

        match timeline.insert(candidate.clone()) {
            Ok(outcome) => {
                let key = match outcome {
                    InsertOutcome::StartDateShifted { new, .. } => new,
                    _ => candidate.date_start,
                };
                let stored = timeline
                    .records()
                    .iter()
                    .find(|r| r.date_start == key)
                    .cloned()
                    .unwrap();
                assert!(timeline.get_overlaps(&stored, Some(key)).is_empty());
            },
            Err(Error::OverlapConflict(intervals)) => assert!(!intervals.is_empty()),
            Err(Error::DuplicateKey(..)) => {},
            Err(e) => panic!("unexpected error: {}", e),
        }

        assert!(timeline.is_consistent());
    }

    assert!(!timeline.is_empty());
}
