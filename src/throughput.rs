//! Sliding-window throughput counter.
//!
//! Counts completions over the last `window` of wall-clock time for live
//! progress reporting. The window is split into fixed slots; each slot is a
//! single atomic word packing the slot's epoch and its count, so increments
//! from many workers never take a lock and stale slots reset themselves the
//! first time they are touched in a new epoch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Number of slots the window is split into.
const SLOTS: usize = 10;

const COUNT_MASK: u64 = 0xFFFF_FFFF;

fn pack(epoch: u32, count: u32) -> u64 {
    (u64::from(epoch) << 32) | u64::from(count)
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, (word & COUNT_MASK) as u32)
}

/// Lock-free count of events over a sliding time window.
pub struct RateCounter {
    start: Instant,
    window: Duration,
    slot_nanos: u128,
    slots: Vec<AtomicU64>,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        let window = window.max(Duration::from_millis(SLOTS as u64));
        Self {
            start: Instant::now(),
            window,
            slot_nanos: window.as_nanos() / SLOTS as u128,
            slots: (0..SLOTS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Epochs start at 1 so an untouched slot (all zeroes) is never current.
    fn epoch_at(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        (elapsed / self.slot_nanos) as u32 + 1
    }

    pub fn incr(&self, n: u32) {
        self.incr_at(Instant::now(), n);
    }

    fn incr_at(&self, now: Instant, n: u32) {
        let epoch = self.epoch_at(now);
        let slot = &self.slots[epoch as usize % SLOTS];

        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let (slot_epoch, count) = unpack(current);
            let next = if slot_epoch == epoch {
                pack(epoch, count.saturating_add(n))
            } else {
                pack(epoch, n)
            };

            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Events recorded within the last window.
    pub fn count(&self) -> u64 {
        self.count_at(Instant::now())
    }

    fn count_at(&self, now: Instant) -> u64 {
        let epoch = self.epoch_at(now);
        self.slots
            .iter()
            .map(|slot| unpack(slot.load(Ordering::Acquire)))
            .filter(|&(slot_epoch, _)| {
                slot_epoch != 0 && slot_epoch <= epoch && epoch - slot_epoch < SLOTS as u32
            })
            .map(|(_, count)| u64::from(count))
            .sum()
    }

    /// Events per second averaged over the window.
    pub fn rate_per_second(&self) -> f64 {
        self.count() as f64 / self.window.as_secs_f64()
    }
}
