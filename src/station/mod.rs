//! Station identities and equipment validity records
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    prelude::{Epoch, Error},
    time::{open_end, seconds_between, truncate_to_second},
};

mod dharp;

pub use dharp::HeightCodeTable;

/// GNSS station identity: network code + station code.
/// Both codes are stored lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StationId {
    /// Network code
    pub network: String,
    /// Station code
    pub station: String,
}

impl StationId {
    pub fn new(network: &str, station: &str) -> Self {
        Self {
            network: network.trim().to_lowercase(),
            station: station.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.network, self.station)
    }
}

/// Validity interval, `end == None` standing for "still valid"
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval {
    pub start: Epoch,
    pub end: Option<Epoch>,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{} -> {}", self.start, end),
            None => write!(f, "{} -> (open)", self.start),
        }
    }
}

/// Equipment deployed at a station during one validity interval
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Equipment {
    pub receiver_code: String,
    pub receiver_serial: String,
    pub receiver_firmware: String,
    pub antenna_code: String,
    pub antenna_serial: String,
    /// Antenna height (meters), interpreted according to `height_code`
    pub antenna_height: f64,
    /// North offset (meters)
    pub antenna_north: f64,
    /// East offset (meters)
    pub antenna_east: f64,
    pub height_code: String,
    pub radome_code: String,
}

impl Equipment {
    /// True when both setups are identical for reconciliation purposes.
    /// Receiver firmware upgrades do not make a new setup.
    pub fn same_setup(&self, rhs: &Self) -> bool {
        self.receiver_code == rhs.receiver_code
            && self.receiver_serial == rhs.receiver_serial
            && self.antenna_code == rhs.antenna_code
            && self.antenna_serial == rhs.antenna_serial
            && self.antenna_height == rhs.antenna_height
            && self.antenna_north == rhs.antenna_north
            && self.antenna_east == rhs.antenna_east
            && self.height_code == rhs.height_code
            && self.radome_code == rhs.radome_code
    }

    /// True if antenna position or phase center may have moved between both setups
    pub fn antenna_changed(&self, rhs: &Self) -> bool {
        self.antenna_code != rhs.antenna_code
            || self.antenna_serial != rhs.antenna_serial
            || self.radome_code != rhs.radome_code
            || (self.antenna_height - rhs.antenna_height).abs() > 1.0E-4
            || (self.antenna_north - rhs.antenna_north).abs() > 1.0E-4
            || (self.antenna_east - rhs.antenna_east).abs() > 1.0E-4
    }
}

/// Station information record: [Equipment] valid over `[date_start, date_end]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StationInfoRecord {
    pub station: StationId,
    pub date_start: Epoch,
    /// None: still valid
    pub date_end: Option<Epoch>,
    pub equipment: Equipment,
    pub comments: String,
}

impl StationInfoRecord {
    /// Builds a new [StationInfoRecord]. Boundaries are truncated to the second.
    /// ## Input
    /// - station: [StationId]
    /// - date_start: first valid [Epoch]
    /// - date_end: last valid [Epoch], None when still valid
    /// - equipment: deployed [Equipment]
    pub fn new(
        station: StationId,
        date_start: Epoch,
        date_end: Option<Epoch>,
        equipment: Equipment,
    ) -> Result<Self, Error> {
        let record = Self {
            station,
            date_start: truncate_to_second(date_start),
            date_end: date_end.map(truncate_to_second),
            equipment,
            comments: String::new(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Copies and returns with comments
    pub fn with_comments(&self, comments: &str) -> Self {
        let mut s = self.clone();
        s.comments = comments.to_string();
        s
    }

    /// Checks the record is self consistent
    pub fn validate(&self) -> Result<(), Error> {
        if self.station.network.is_empty() || self.station.station.is_empty() {
            return Err(Error::InvalidRecord("empty network or station code".to_string()));
        }
        if let Some(end) = self.date_end {
            if end < self.date_start {
                return Err(Error::InvalidRecord(format!(
                    "{}: DateEnd {} prior DateStart {}",
                    self.station, end, self.date_start
                )));
            }
        }
        let eq = &self.equipment;
        for (name, value) in [
            ("antenna height", eq.antenna_height),
            ("antenna north", eq.antenna_north),
            ("antenna east", eq.antenna_east),
        ] {
            if !value.is_finite() {
                return Err(Error::InvalidRecord(format!(
                    "{}: {} is not a finite number",
                    self.station, name
                )));
            }
        }
        Ok(())
    }

    /// True when this record is still valid
    pub fn is_open(&self) -> bool {
        self.date_end.is_none()
    }

    /// DateEnd, or the far future sentinel for open records
    pub fn end_or_sentinel(&self) -> Epoch {
        self.date_end.unwrap_or_else(open_end)
    }

    /// Validity [Interval]
    pub fn interval(&self) -> Interval {
        Interval {
            start: self.date_start,
            end: self.date_end,
        }
    }

    /// Duration (seconds) both validity intervals share.
    /// Negative or null when they do not intersect.
    pub fn overlap_seconds(&self, rhs: &Self) -> f64 {
        let start = self.date_start.max(rhs.date_start);
        let end = self.end_or_sentinel().min(rhs.end_or_sentinel());
        seconds_between(start, end)
    }

    /// Strict overlap: touching boundaries do not overlap.
    pub fn overlaps(&self, rhs: &Self) -> bool {
        self.overlap_seconds(rhs) > 0.0
    }

    /// True if `t` lies within this validity interval (both ends inclusive)
    pub fn contains(&self, t: Epoch) -> bool {
        self.date_start <= t && t <= self.end_or_sentinel()
    }

    /// Human readable dump, used by audit events
    pub fn dump(&self) -> String {
        let eq = &self.equipment;
        format!(
            "{} [{}] RX {} #{} ({}) ANT {} #{} {} H={:.4} N={:.4} E={:.4} {}",
            self.station,
            self.interval(),
            eq.receiver_code,
            eq.receiver_serial,
            eq.receiver_firmware,
            eq.antenna_code,
            eq.antenna_serial,
            eq.radome_code,
            eq.antenna_height,
            eq.antenna_north,
            eq.antenna_east,
            eq.height_code,
        )
    }
}
