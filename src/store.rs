//! Interfaces to external collaborators (relational store, observation catalog,
//! mutual exclusion tokens) and their in-memory implementations.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Instant,
};

use log::{debug, warn};

use crate::{
    gaps::{Gap, ObservationInterval},
    prelude::{Duration, Epoch, Error, StationId, StationInfoRecord, StationInfoTimeline},
    timeline::Change,
};

/// Relational station information store
pub trait StationInfoStore: Send + Sync {
    /// Committed [StationInfoTimeline] of this station
    fn timeline(&self, station: &StationId) -> Result<StationInfoTimeline, Error>;

    /// Runs `f` on the station [StationInfoTimeline] within a transaction:
    /// pending changes are committed when `f` returns `Ok`, discarded otherwise.
    /// Concurrent transactions on the same station may not interleave.
    fn transaction<T, F>(&self, station: &StationId, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut StationInfoTimeline) -> Result<T, Error>;

    /// Every station known to this store
    fn stations(&self) -> Vec<StationId>;
}

/// Observation file catalog
pub trait ObservationSource: Send + Sync {
    fn observations(&self, station: &StationId) -> Result<Vec<ObservationInterval>, Error>;
}

/// Summary row of the gap detection
#[derive(Debug, Clone, PartialEq)]
pub struct GapStatus {
    pub has_gaps: bool,
    pub has_station_info: bool,
    pub last_updated: Epoch,
}

/// Derived gap rows and "needs update" flags
pub trait GapStore: Send + Sync {
    /// Flags this station for the next batch update. Every flag
    /// is stamped with a new, strictly increasing generation.
    fn mark_dirty(&self, station: &StationId);

    /// Flagged stations and the generation of their latest flag
    fn dirty_stations(&self) -> Vec<(StationId, u64)>;

    /// Replaces all gap rows of this station and stores the summary.
    /// The dirty flag is cleared only if the station was not flagged again
    /// since `generation` was read.
    /// ## Returns
    /// - true when the flag was cleared
    fn replace_gaps(
        &self,
        station: &StationId,
        generation: u64,
        gaps: Vec<Gap>,
        status: GapStatus,
    ) -> bool;

    fn gaps(&self, station: &StationId) -> Vec<Gap>;

    fn status(&self, station: &StationId) -> Option<GapStatus>;
}

/// Distributed mutual exclusion token provider
pub trait LockProvider: Send + Sync {
    /// Non blocking: returns false if `key` is already held.
    /// The token expires after `timeout`.
    fn acquire(&self, key: &str, timeout: Duration) -> bool;

    fn release(&self, key: &str);
}

/// Releases its token when dropped
pub struct LockGuard<'a> {
    provider: &'a dyn LockProvider,
    key: String,
}

impl<'a> LockGuard<'a> {
    /// Acquires `key` or fails with [Error::LockAlreadyHeld]
    pub fn acquire(
        provider: &'a dyn LockProvider,
        key: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        if provider.acquire(key, timeout) {
            debug!("lock \"{}\" acquired", key);
            Ok(Self {
                provider,
                key: key.to_string(),
            })
        } else {
            Err(Error::LockAlreadyHeld(key.to_string()))
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.provider.release(&self.key);
        debug!("lock \"{}\" released", self.key);
    }
}

/// In-memory [StationInfoStore]
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<StationId, BTreeMap<Epoch, StationInfoRecord>>>,
}

impl MemoryStore {
    fn apply(rows: &mut BTreeMap<Epoch, StationInfoRecord>, change: Change) {
        match change {
            Change::Insert(record) | Change::Update(record) => {
                rows.insert(record.date_start, record);
            },
            Change::Rekey { old, new } => {
                if let Some(mut record) = rows.remove(&old) {
                    record.date_start = new;
                    rows.insert(new, record);
                }
            },
            Change::Delete(start) => {
                rows.remove(&start);
            },
        }
    }
}

impl StationInfoStore for MemoryStore {
    fn timeline(&self, station: &StationId) -> Result<StationInfoTimeline, Error> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let records = rows
            .get(station)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default();
        Ok(StationInfoTimeline::from_records(station.clone(), records))
    }

    fn transaction<T, F>(&self, station: &StationId, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut StationInfoTimeline) -> Result<T, Error>,
    {
        // held for the whole transaction: serializes concurrent writers
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());

        let records = rows
            .get(station)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default();

        let mut timeline = StationInfoTimeline::from_records(station.clone(), records);

        let ret = f(&mut timeline)?;

        let table = rows.entry(station.clone()).or_default();
        for change in timeline.take_changes() {
            Self::apply(table, change);
        }
        Ok(ret)
    }

    fn stations(&self) -> Vec<StationId> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.keys().cloned().collect()
    }
}

/// In-memory [ObservationSource]
#[derive(Default)]
pub struct MemoryObservations {
    inner: Mutex<HashMap<StationId, Vec<ObservationInterval>>>,
}

impl MemoryObservations {
    pub fn add(&self, obs: ObservationInterval) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entry(obs.station.clone()).or_default().push(obs);
    }

    /// Removes every observation of this station
    pub fn clear(&self, station: &StationId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(station);
    }
}

impl ObservationSource for MemoryObservations {
    fn observations(&self, station: &StationId) -> Result<Vec<ObservationInterval>, Error> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.get(station).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct GapTables {
    generation: u64,
    dirty: BTreeMap<StationId, u64>,
    gaps: HashMap<StationId, Vec<Gap>>,
    status: HashMap<StationId, GapStatus>,
}

/// In-memory [GapStore]
#[derive(Default)]
pub struct MemoryGapStore {
    inner: Mutex<GapTables>,
}

impl GapStore for MemoryGapStore {
    fn mark_dirty(&self, station: &StationId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.generation += 1;
        let generation = inner.generation;
        inner.dirty.insert(station.clone(), generation);
    }

    fn dirty_stations(&self) -> Vec<(StationId, u64)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .dirty
            .iter()
            .map(|(station, generation)| (station.clone(), *generation))
            .collect()
    }

    fn replace_gaps(
        &self,
        station: &StationId,
        generation: u64,
        gaps: Vec<Gap>,
        status: GapStatus,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.gaps.insert(station.clone(), gaps);
        inner.status.insert(station.clone(), status);
        match inner.dirty.get(station) {
            Some(latest) if *latest > generation => false,
            _ => {
                inner.dirty.remove(station);
                true
            },
        }
    }

    fn gaps(&self, station: &StationId) -> Vec<Gap> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.gaps.get(station).cloned().unwrap_or_default()
    }

    fn status(&self, station: &StationId) -> Option<GapStatus> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.status.get(station).cloned()
    }
}

/// In-memory [LockProvider] with expiring tokens
#[derive(Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, Instant>>,
}

impl LockProvider for MemoryLock {
    fn acquire(&self, key: &str, timeout: Duration) -> bool {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(expiry) = held.get(key) {
            if *expiry > now {
                return false;
            }
            warn!("lock \"{}\" expired: taking over", key);
        }
        let timeout = std::time::Duration::from_secs_f64(timeout.to_seconds().max(0.0));
        held.insert(key.to_string(), now + timeout);
        true
    }

    fn release(&self, key: &str) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(key);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_released() {
        let lock = MemoryLock::default();
        let timeout = Duration::from_seconds(60.0);
        {
            let _guard = LockGuard::acquire(&lock, "gaps", timeout).unwrap();
            assert_eq!(
                LockGuard::acquire(&lock, "gaps", timeout).err(),
                Some(Error::LockAlreadyHeld("gaps".to_string()))
            );
            assert!(LockGuard::acquire(&lock, "other", timeout).is_ok());
        }
        assert!(LockGuard::acquire(&lock, "gaps", timeout).is_ok());
    }

    #[test]
    fn reflagged_station_stays_dirty() {
        let store = MemoryGapStore::default();
        let station = StationId::new("igs", "braz");
        let status = GapStatus {
            has_gaps: false,
            has_station_info: true,
            last_updated: Epoch::from_gregorian_utc_at_midnight(2024, 1, 1),
        };

        store.mark_dirty(&station);
        let snapshot = store.dirty_stations();
        assert_eq!(snapshot.len(), 1);
        let (_, generation) = snapshot[0].clone();

        // committed while the snapshot was being processed
        store.mark_dirty(&station);
        assert!(!store.replace_gaps(&station, generation, Vec::new(), status.clone()));
        assert_eq!(store.status(&station), Some(status.clone()));

        let (_, latest) = store.dirty_stations()[0].clone();
        assert!(latest > generation);
        assert!(store.replace_gaps(&station, latest, Vec::new(), status));
        assert!(store.dirty_stations().is_empty());
    }

    #[test]
    fn expired_lock_is_taken_over() {
        let lock = MemoryLock::default();
        assert!(lock.acquire("gaps", Duration::from_seconds(0.0)));
        assert!(lock.acquire("gaps", Duration::from_seconds(60.0)));
        assert!(!lock.acquire("gaps", Duration::from_seconds(60.0)));
    }
}
