//! Latest known state of every registered Tilt.
//!
//! The store is written by exactly two operations: [`DeviceStore::ingest`]
//! when a frame is accepted and [`DeviceStore::record_publish`] when a
//! publish attempt completes. Everything else reads snapshots.

use crate::decoder::Decoded;
use crate::reading::Reading;
use crate::registry::{ColorLabel, DeviceIdentity, Registry};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mutable state of one registry slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Latest accepted reading, `None` until the first sighting
    pub reading: Option<Reading>,
    /// Unix seconds of the latest accepted reading, 0 when never heard
    pub last_heard: i64,
    /// The latest reading has not been published successfully yet
    pub pending: bool,
    /// Bumped on every ingest so publish outcomes can name what they sent
    pub generation: u64,
}

/// A read-only copy of one device's identity and state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub identity: DeviceIdentity,
    pub state: DeviceState,
}

/// Per-device state table, one entry per registry slot.
#[derive(Debug)]
pub struct DeviceStore {
    registry: Registry,
    states: Vec<DeviceState>,
}

/// Store shared between the radio loop and the query server.
///
/// Both run on one current-thread runtime; the lock only guards whole-entry
/// reads and writes and is never held across an `.await`.
pub type SharedStore = Arc<Mutex<DeviceStore>>;

impl DeviceStore {
    pub fn new(registry: Registry) -> Self {
        let states = vec![DeviceState::default(); registry.len()];
        Self { registry, states }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an accepted reading and mark it pending publication.
    ///
    /// Returns the new generation of the device, or `None` if the index does
    /// not belong to this store's registry.
    pub fn ingest(&mut self, decoded: &Decoded) -> Option<u64> {
        let state = self.states.get_mut(decoded.index)?;
        state.reading = Some(decoded.reading);
        state.last_heard = decoded.reading.observed_secs();
        state.pending = true;
        state.generation += 1;
        Some(state.generation)
    }

    /// Apply the outcome of publishing `generation` of device `index`.
    ///
    /// Only a successful publish of the current generation clears `pending`;
    /// a newer ingest in the meantime keeps the device pending. Returns
    /// whether `pending` was cleared.
    pub fn record_publish(&mut self, index: usize, generation: u64, success: bool) -> bool {
        match self.states.get_mut(index) {
            Some(state) if success && state.generation == generation => {
                state.pending = false;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self, index: usize) -> Option<DeviceSnapshot> {
        let identity = self.registry.get(index)?;
        let state = self.states.get(index)?;
        Some(DeviceSnapshot {
            identity: identity.clone(),
            state: state.clone(),
        })
    }

    /// Snapshots of every device heard after `watermark` (Unix seconds).
    ///
    /// A watermark of 0 still excludes devices that were never heard.
    pub fn heard_since(&self, watermark: i64) -> Vec<DeviceSnapshot> {
        self.registry
            .iter()
            .zip(&self.states)
            .filter(|(_, state)| state.last_heard > watermark)
            .map(|(identity, state)| DeviceSnapshot {
                identity: identity.clone(),
                state: state.clone(),
            })
            .collect()
    }

    /// Snapshot of the device with `label`, if it was heard after `watermark`.
    pub fn find_heard_since(&self, label: ColorLabel, watermark: i64) -> Option<DeviceSnapshot> {
        self.heard_since(watermark)
            .into_iter()
            .find(|snapshot| snapshot.identity.label == label)
    }
}

/// Lock the shared store, recovering from poisoning.
///
/// Entries are always overwritten whole, so a panic mid-update cannot leave
/// a half-written entry behind.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, DeviceStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
