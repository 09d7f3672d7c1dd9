//! Audit events
use std::sync::Mutex;

use log::{error, info, warn};

use crate::prelude::StationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Info,
    Warning,
    Error,
}

/// Audit [Event] emitted by timeline mutations
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub description: String,
    pub station: StationId,
    pub event_type: EventType,
}

impl Event {
    pub fn info(station: &StationId, description: String) -> Self {
        Self {
            description,
            station: station.clone(),
            event_type: EventType::Info,
        }
    }
}

/// Event sink: fire and forget, never fails.
pub trait EventSink: Send + Sync {
    fn record_event(&self, event: Event);
}

/// Discards all [Event]s
pub struct NullSink;

impl EventSink for NullSink {
    fn record_event(&self, _: Event) {}
}

/// Forwards [Event]s to the `log` facade
pub struct LogSink;

impl EventSink for LogSink {
    fn record_event(&self, event: Event) {
        match event.event_type {
            EventType::Info => info!("{}: {}", event.station, event.description),
            EventType::Warning => warn!("{}: {}", event.station, event.description),
            EventType::Error => error!("{}: {}", event.station, event.description),
        }
    }
}

/// Keeps [Event]s in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Copy of all recorded [Event]s
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventSink for MemorySink {
    fn record_event(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
