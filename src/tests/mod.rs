mod service;
mod timeline;

use log::LevelFilter;
use std::sync::Once;

use rstest::fixture;

use crate::prelude::{Epoch, Equipment, StationId, StationInfoRecord};

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(LevelFilter::Debug)
            .init();
    });
}

#[fixture]
pub fn station() -> StationId {
    StationId::new("igs", "braz")
}

#[fixture]
pub fn equipment() -> Equipment {
    Equipment {
        receiver_code: "TRIMBLE NETR9".to_string(),
        receiver_serial: "5034K69581".to_string(),
        receiver_firmware: "4.85".to_string(),
        antenna_code: "TRM59800.00".to_string(),
        antenna_serial: "1440911917".to_string(),
        antenna_height: 0.0083,
        antenna_north: 0.0,
        antenna_east: 0.0,
        height_code: "DHARP".to_string(),
        radome_code: "SCIS".to_string(),
    }
}

/// Midnight UTC
pub fn utc(y: i32, m: u8, d: u8) -> Epoch {
    Epoch::from_gregorian_utc_at_midnight(y, m, d)
}

pub fn utc_hms(y: i32, m: u8, d: u8, hh: u8, mm: u8, ss: u8) -> Epoch {
    Epoch::from_gregorian_utc_hms(y, m, d, hh, mm, ss)
}

pub fn record(
    station: &StationId,
    start: Epoch,
    end: Option<Epoch>,
    equipment: &Equipment,
) -> StationInfoRecord {
    StationInfoRecord::new(station.clone(), start, end, equipment.clone()).unwrap()
}
