#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

// private modules
mod adjustment;
mod averager;
mod cfg;
mod constants;
mod constraints;
mod dra;
mod error;
mod etm;
mod events;
mod gaps;
mod helmert;
mod polyhedron;
mod pool;
mod position;
mod provider;
mod service;
mod stack;
mod station;
mod store;
mod time;
mod timeline;

#[cfg(test)]
mod tests;

// prelude
pub mod prelude {
    pub use crate::adjustment::{
        adjust, iqr, irls_step, percentile, wrms, ChiSquareBounds, IrlsSolution, IrlsState,
        IrlsStep,
    };
    pub use crate::averager::Averager;
    pub use crate::cfg::{Config, EtmOpts, GapOpts, IrlsOpts, StackOpts};
    pub use crate::constraints::{
        align_to_frame, estimate_frame_alignment, FrameAlignment, FrameConstraints,
        PeriodicCorrection, StationConstraint,
    };
    pub use crate::dra::{daily_repeatability, DailyRepeatability, DraReport, StationRepeatability};
    pub use crate::error::Error;
    pub use crate::etm::{Etm, Jump, JumpKind, PeriodicTerm, TimeSeries};
    pub use crate::events::{Event, EventSink, EventType, LogSink, MemorySink, NullSink};
    pub use crate::gaps::{
        rinex_status_classification, BatchGapUpdater, BatchOutcome, BatchSummary, Gap,
        GapDetector, GapKind, GapReport, MetadataMismatch, ObservationInterval,
        ObservationReport, ObservationStatus, SubGroup, SuperGroup, BATCH_GAP_LOCK,
    };
    pub use crate::helmert::Helmert;
    pub use crate::polyhedron::{AlignmentInfo, Polyhedron, Vertex};
    pub use crate::pool::WorkerPool;
    pub use crate::position::Position;
    pub use crate::provider::{DailySolution, DailySolutionProvider, MemoryProvider};
    pub use crate::service::StationInfoService;
    pub use crate::stack::{
        IterationSnapshot, MemoryStackStore, Stack, StackAligner, StackLease, StackRow,
        StackStore,
    };
    pub use crate::station::{Equipment, HeightCodeTable, Interval, StationId, StationInfoRecord};
    pub use crate::store::{
        GapStatus, GapStore, LockGuard, LockProvider, MemoryGapStore, MemoryLock,
        MemoryObservations, MemoryStore, ObservationSource, StationInfoStore,
    };
    pub use crate::time::{fyear, from_year_doy, open_end, year_doy};
    pub use crate::timeline::{Change, InsertOutcome, RecordUpdate, StationInfoTimeline};
    // re-export
    pub use hifitime::{Duration, Epoch, TimeScale, Unit};
    pub use nalgebra::Vector3;
}

// pub export
pub use cfg::Error as ConfigError;
pub use error::Error;
