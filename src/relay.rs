//! The relay engine: decode, ingest, debounce and publish.
//!
//! A [`Relay`] owns the debounce timers and shares the device store with the
//! query server. It is driven from a single task: frames come in through
//! [`Relay::accept`], and [`Relay::service_due`] runs whatever ticks are due.
//! At most one publish is in flight at any time.

use crate::decoder::{self, Decoded, DecodeError};
use crate::publisher::{PublishPayload, Publisher};
use crate::scheduler::{Scheduler, Tick};
use crate::store::{self, DeviceStore, SharedStore};
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of servicing one due tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published { index: usize },
    Failed { index: usize },
    Disarmed { index: usize },
}

pub struct Relay {
    store: SharedStore,
    scheduler: Scheduler,
}

impl Relay {
    pub fn new(store: DeviceStore) -> Self {
        Self::with_shared(store.shared())
    }

    /// Build a relay around a store that is also handed to readers.
    pub fn with_shared(store: SharedStore) -> Self {
        let scheduler = {
            let guard = store::lock(&store);
            Scheduler::new(guard.registry().iter().map(|d| d.interval))
        };
        Self { store, scheduler }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Accept one raw manufacturer-data frame from the radio.
    pub fn accept(&mut self, frame: &[u8]) -> Result<Decoded, DecodeError> {
        self.accept_at(frame, SystemTime::now(), Instant::now())
    }

    /// Accept a frame observed at wall-clock `observed_at` and monotonic `now`.
    ///
    /// On a match the device state is overwritten, marked pending, and its
    /// timer armed. Rejected frames leave everything untouched.
    pub fn accept_at(
        &mut self,
        frame: &[u8],
        observed_at: SystemTime,
        now: Instant,
    ) -> Result<Decoded, DecodeError> {
        let mut store = store::lock(&self.store);
        let decoded = decoder::decode_at(store.registry(), frame, observed_at)?;

        if store.ingest(&decoded).is_some() {
            self.scheduler.arm(decoded.index, now);
            if let Some(identity) = store.registry().get(decoded.index) {
                info!(
                    device = %identity.label,
                    gravity = decoded.reading.gravity,
                    temperature = decoded.reading.temperature,
                    tx_power = decoded.reading.tx_power,
                    observed_at = decoded.reading.observed_secs(),
                    "reading accepted"
                );
            }
        }
        Ok(decoded)
    }

    /// When the next tick is due, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Run every tick due at `now`, one device after the other.
    ///
    /// A device with a pending reading is published from its state at tick
    /// time, and the outcome is written back before the next device is
    /// looked at. A device with nothing pending has its timer disarmed
    /// without contacting the publisher.
    pub async fn service_due(&mut self, publisher: &dyn Publisher, now: Instant) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();

        for index in self.scheduler.due(now) {
            let Some(snapshot) = store::lock(&self.store).snapshot(index) else {
                continue;
            };
            let label = snapshot.identity.label;

            match self.scheduler.fire(index, snapshot.state.pending, now) {
                Some(Tick::Disarm) => {
                    info!(device = %label, "nothing new received since last post, disabling timer");
                    outcomes.push(TickOutcome::Disarmed { index });
                }
                Some(Tick::Publish) => {
                    let Some(payload) = PublishPayload::from_snapshot(&snapshot) else {
                        continue;
                    };
                    let generation = snapshot.state.generation;

                    let success = match publisher.publish(&payload).await {
                        Ok(()) => {
                            info!(device = %label, gravity = %payload.gravity, temp = %payload.temp, "published");
                            true
                        }
                        Err(error) => {
                            warn!(device = %label, %error, "publish failed, retrying next tick");
                            false
                        }
                    };

                    let cleared = store::lock(&self.store).record_publish(index, generation, success);
                    if success && !cleared {
                        debug!(device = %label, "newer reading arrived during publish, still pending");
                    }
                    outcomes.push(if success {
                        TickOutcome::Published { index }
                    } else {
                        TickOutcome::Failed { index }
                    });
                }
                None => {}
            }
        }

        outcomes
    }
}
