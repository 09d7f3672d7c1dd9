use std::collections::HashMap;

use log::debug;

use crate::{
    constants::DHARP,
    prelude::{Error, StationInfoRecord},
};

/// Height code translation table: (antenna code, height code) to
/// (horizontal offset, vertical offset) in meters.
#[derive(Debug, Clone, Default)]
pub struct HeightCodeTable {
    offsets: HashMap<(String, String), (f64, f64)>,
}

impl HeightCodeTable {
    /// Builds a new [HeightCodeTable] from (antenna, height code, h_offset, v_offset) rows
    pub fn new(rows: &[(&str, &str, f64, f64)]) -> Self {
        let mut s = Self::default();
        for (antenna, code, h_offset, v_offset) in rows {
            s.insert(antenna, code, *h_offset, *v_offset);
        }
        s
    }

    pub fn insert(&mut self, antenna: &str, height_code: &str, h_offset: f64, v_offset: f64) {
        self.offsets.insert(
            (antenna.trim().to_string(), height_code.trim().to_string()),
            (h_offset, v_offset),
        );
    }

    /// (h_offset, v_offset) of this (antenna, height code) pair
    pub fn lookup(&self, antenna: &str, height_code: &str) -> Option<(f64, f64)> {
        self.offsets
            .get(&(antenna.trim().to_string(), height_code.trim().to_string()))
            .copied()
    }
}

impl StationInfoRecord {
    /// Normalizes the antenna height of this record to DHARP.
    /// Does nothing when the height code already is DHARP.
    pub fn to_dharp(&mut self, table: &HeightCodeTable) -> Result<(), Error> {
        let eq = &mut self.equipment;
        if eq.height_code == DHARP {
            return Ok(());
        }

        let (h_offset, v_offset) =
            table
                .lookup(&eq.antenna_code, &eq.height_code)
                .ok_or_else(|| Error::HeightCodeNotFound {
                    antenna: eq.antenna_code.clone(),
                    height_code: eq.height_code.clone(),
                })?;

        let squared = eq.antenna_height.powi(2) - h_offset.powi(2);
        if squared < 0.0 {
            return Err(Error::InvalidAntennaHeight {
                height: eq.antenna_height,
                offset: h_offset,
            });
        }

        let height = squared.sqrt() - v_offset;
        debug!(
            "{}: {} {:.4}m ({}) -> {:.4}m ({})",
            self.station, eq.antenna_code, eq.antenna_height, eq.height_code, height, DHARP
        );

        let note = format!(
            "antenna height converted from {} ({:.4}m)",
            eq.height_code, eq.antenna_height
        );

        eq.antenna_height = height;
        eq.height_code = DHARP.to_string();

        if self.comments.is_empty() {
            self.comments = note;
        } else {
            self.comments.push_str(". ");
            self.comments.push_str(&note);
        }
        Ok(())
    }
}
