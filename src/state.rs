use crate::types::WeightSample;
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_time::Instant;
use log::debug;
use std::cell::Cell;

#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    grams: f32,
    observed_at: Option<Instant>,
    fresh: bool,
    armed: bool,
    last_packet: Option<Instant>,
}

/// Latest weight plus the "new weight" flag, shared between the stack's
/// notification callback and the tick loop.
///
/// Every access is one short critical section, so a reader never sees a
/// weight without its flag or the other way round.
pub struct WeightSlot {
    inner: Mutex<CriticalSectionRawMutex, Cell<SlotState>>,
}

impl Default for WeightSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(SlotState::default())),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut SlotState) -> R) -> R {
        self.inner.lock(|cell| {
            let mut state = cell.get();
            let result = f(&mut state);
            cell.set(state);
            result
        })
    }

    fn read(&self) -> SlotState {
        self.inner.lock(|cell| cell.get())
    }

    /// Any notification, decodable or not, proves the link is alive.
    pub fn record_packet(&self, at: Instant) {
        self.update(|s| s.last_packet = Some(at));
    }

    /// Store a decoded sample. Dropped unless the slot is armed.
    pub fn publish(&self, sample: WeightSample) -> bool {
        self.update(|s| {
            if !s.armed {
                return false;
            }
            s.grams = sample.grams;
            s.observed_at = Some(sample.observed_at);
            s.fresh = true;
            true
        })
    }

    /// Consume the "new weight" flag.
    pub fn take_fresh(&self) -> bool {
        self.update(|s| std::mem::replace(&mut s.fresh, false))
    }

    pub fn latest(&self) -> Option<WeightSample> {
        let s = self.read();
        s.observed_at.map(|observed_at| WeightSample {
            grams: s.grams,
            observed_at,
        })
    }

    /// Last published weight, 0.0 before the first one.
    pub fn grams(&self) -> f32 {
        self.read().grams
    }

    pub fn last_packet(&self) -> Option<Instant> {
        self.read().last_packet
    }

    pub fn is_armed(&self) -> bool {
        self.read().armed
    }

    /// Start accepting samples. Called on entering Connected.
    pub fn arm(&self) {
        debug!("Weight slot armed");
        self.update(|s| {
            s.armed = true;
            s.fresh = false;
        });
    }

    /// Stop accepting samples and drop any unconsumed one.
    pub fn disarm(&self) {
        self.update(|s| {
            if s.armed {
                debug!("Weight slot disarmed");
            }
            s.armed = false;
            s.fresh = false;
        });
    }
}
