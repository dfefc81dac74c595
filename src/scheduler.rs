//! Per-device debounce timers.
//!
//! Each device owns an independent repeating timer that is either idle or
//! armed. Ingesting a reading arms it; a tick that finds nothing pending
//! disarms it again. Publishing itself happens outside this module, the
//! scheduler only decides when to try.

use std::time::Duration;
use tokio::time::Instant;

/// Timer state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Disabled until the next ingest
    Idle,
    /// Ticking; the next tick is due at `next_tick`
    Armed { next_tick: Instant },
}

/// What a due tick asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The device has an unpublished reading: publish it now.
    Publish,
    /// Nothing new since the last successful publish: the timer is now idle.
    Disarm,
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    interval: Duration,
    state: TimerState,
}

/// Debounce timers for every registry slot, indexed like the registry.
#[derive(Debug, Clone)]
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
}

impl Scheduler {
    /// Create one idle timer per interval.
    pub fn new(intervals: impl IntoIterator<Item = Duration>) -> Self {
        let entries = intervals
            .into_iter()
            .map(|interval| ScheduleEntry {
                interval,
                state: TimerState::Idle,
            })
            .collect();
        Self { entries }
    }

    pub fn state(&self, index: usize) -> Option<TimerState> {
        self.entries.get(index).map(|e| e.state)
    }

    pub fn is_armed(&self, index: usize) -> bool {
        matches!(self.state(index), Some(TimerState::Armed { .. }))
    }

    /// Arm the timer of `index` after an ingest.
    ///
    /// An idle timer first ticks one interval from `now`. An armed timer
    /// keeps its cadence, so a chatty beacon cannot postpone publication.
    pub fn arm(&mut self, index: usize, now: Instant) {
        if let Some(entry) = self.entries.get_mut(index)
            && entry.state == TimerState::Idle
        {
            entry.state = TimerState::Armed {
                next_tick: now + entry.interval,
            };
        }
    }

    /// The earliest pending tick across all devices.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter_map(|e| match e.state {
                TimerState::Armed { next_tick } => Some(next_tick),
                TimerState::Idle => None,
            })
            .min()
    }

    /// Indices of armed devices whose tick is due at `now`.
    pub fn due(&self, now: Instant) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, e)| match e.state {
                TimerState::Armed { next_tick } if next_tick <= now => Some(index),
                _ => None,
            })
            .collect()
    }

    /// Fire the tick of `index`, given whether the device still has an
    /// unpublished reading.
    ///
    /// With nothing pending the timer goes idle. Otherwise it stays armed
    /// and the next tick is scheduled one interval later; ticks missed while
    /// the loop was busy are skipped rather than replayed.
    pub fn fire(&mut self, index: usize, pending: bool, now: Instant) -> Option<Tick> {
        let entry = self.entries.get_mut(index)?;
        let TimerState::Armed { next_tick } = entry.state else {
            return None;
        };

        if !pending {
            entry.state = TimerState::Idle;
            return Some(Tick::Disarm);
        }

        let mut next = next_tick + entry.interval;
        if next <= now {
            next = now + entry.interval;
        }
        entry.state = TimerState::Armed { next_tick: next };
        Some(Tick::Publish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(900);

    fn scheduler(n: usize) -> Scheduler {
        Scheduler::new(std::iter::repeat_n(INTERVAL, n))
    }

    #[test]
    fn test_timers_start_idle() {
        let s = scheduler(3);
        for i in 0..3 {
            assert_eq!(s.state(i), Some(TimerState::Idle));
        }
        assert_eq!(s.next_deadline(), None);
        assert!(s.due(Instant::now() + INTERVAL * 10).is_empty());
    }

    #[test]
    fn test_arm_schedules_first_tick_one_interval_out() {
        let mut s = scheduler(2);
        let now = Instant::now();
        s.arm(1, now);

        assert!(s.is_armed(1));
        assert!(!s.is_armed(0));
        assert_eq!(s.next_deadline(), Some(now + INTERVAL));
        assert!(s.due(now).is_empty());
        assert_eq!(s.due(now + INTERVAL), vec![1]);
    }

    #[test]
    fn test_rearm_keeps_cadence() {
        let mut s = scheduler(1);
        let now = Instant::now();
        s.arm(0, now);
        s.arm(0, now + Duration::from_secs(300));
        assert_eq!(s.next_deadline(), Some(now + INTERVAL));
    }

    #[test]
    fn test_fire_pending_publishes_and_stays_armed() {
        let mut s = scheduler(1);
        let now = Instant::now();
        s.arm(0, now);

        let tick_at = now + INTERVAL;
        assert_eq!(s.fire(0, true, tick_at), Some(Tick::Publish));
        assert_eq!(s.next_deadline(), Some(tick_at + INTERVAL));
    }

    #[test]
    fn test_fire_without_pending_disarms() {
        let mut s = scheduler(1);
        let now = Instant::now();
        s.arm(0, now);

        assert_eq!(s.fire(0, false, now + INTERVAL), Some(Tick::Disarm));
        assert_eq!(s.state(0), Some(TimerState::Idle));
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn test_fire_on_idle_timer_is_noop() {
        let mut s = scheduler(1);
        assert_eq!(s.fire(0, true, Instant::now()), None);
        assert_eq!(s.fire(5, true, Instant::now()), None);
    }

    #[test]
    fn test_fire_skips_missed_ticks() {
        let mut s = scheduler(1);
        let now = Instant::now();
        s.arm(0, now);

        let late = now + INTERVAL * 5;
        assert_eq!(s.fire(0, true, late), Some(Tick::Publish));
        assert_eq!(s.next_deadline(), Some(late + INTERVAL));
    }

    #[test]
    fn test_devices_are_independent() {
        let mut s = Scheduler::new([INTERVAL, Duration::from_secs(60)]);
        let now = Instant::now();
        s.arm(0, now);
        s.arm(1, now);

        assert_eq!(s.next_deadline(), Some(now + Duration::from_secs(60)));
        assert_eq!(s.due(now + Duration::from_secs(60)), vec![1]);
        assert_eq!(s.due(now + INTERVAL), vec![0, 1]);

        assert_eq!(
            s.fire(1, false, now + Duration::from_secs(60)),
            Some(Tick::Disarm)
        );
        assert!(s.is_armed(0));
    }
}
