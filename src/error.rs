use thiserror::Error;

use crate::{
    cfg::Error as ConfigError,
    prelude::{Epoch, Interval, StationId},
};

fn format_intervals(intervals: &[Interval]) -> String {
    intervals
        .iter()
        .map(|interval| interval.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The proposed validity interval conflicts with existing records.
    /// Lists every conflicting interval so the user may resolve it.
    #[error("station information overlaps existing records: {}", format_intervals(.0))]
    OverlapConflict(Vec<Interval>),

    /// A record starting at this very [Epoch] already exists
    #[error("{0}: station information starting {1} already exists")]
    DuplicateKey(StationId, Epoch),

    /// (antenna, height code) pair missing from the height code table:
    /// the record cannot be normalized to DHARP.
    #[error("height code {height_code} not found for antenna {antenna}")]
    HeightCodeNotFound {
        antenna: String,
        height_code: String,
    },

    /// DHARP conversion would take the square root of a negative number
    #[error("antenna height {height:.4}m is smaller than horizontal offset {offset:.4}m")]
    InvalidAntennaHeight { height: f64, offset: f64 },

    /// Record failed construction time validation
    #[error("invalid station information: {0}")]
    InvalidRecord(String),

    #[error("{0}: no station information starting {1}")]
    RecordNotFound(StationId, Epoch),

    /// Record presented to the timeline of another station
    #[error("record belongs to {0}, not to this timeline")]
    ForeignRecord(StationId),

    /// Station has no metadata at all. Reported as a distinct condition, never as a gap.
    #[error("{0}: no station information")]
    NoStationInfo(StationId),

    /// Not enough observations to form a least squares problem
    #[error("insufficient data: {got} observations for {needed} parameters")]
    InsufficientData { needed: usize, got: usize },

    #[error("failed to invert matrix")]
    MatrixInversion,

    /// Another batch gap update is running: try again later
    #[error("lock \"{0}\" already held: try again later")]
    LockAlreadyHeld(String),

    /// Controller bookkeeping bug: a polyhedron was presented a target for another day.
    /// Aborts the stacking run.
    #[error("{project}: polyhedron of {date} presented target of {target}")]
    DateMismatch {
        project: String,
        date: Epoch,
        target: Epoch,
    },

    /// Aligned polyhedrons are terminal
    #[error("polyhedron of {0} is already aligned")]
    AlreadyAligned(Epoch),

    /// Another run holds this stack
    #[error("stack {project}/{name} is in use")]
    StackLocked { project: String, name: String },

    /// External collaborator (store, provider) failure
    #[error("store error: {0}")]
    Store(String),

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
