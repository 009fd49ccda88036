//! Epoch-seconds clock capability.
//!
//! Staleness and liveness windows are enforced lazily at query time, so the
//! only thing the engine needs from the outside world is "what second is
//! it". Handlers take the clock as a trait object; tests inject a frozen
//! clock and advance it by hand.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

pub trait Clock: Send + Sync + fmt::Debug {
    /// Seconds since the Unix epoch.
    fn epoch_seconds(&self) -> u32;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_seconds(&self) -> u32 {
        chrono::Utc::now().timestamp().max(0) as u32
    }
}

/// Manually-advanced clock for tests.
#[derive(Debug, Default)]
pub struct FrozenClock {
    now: AtomicU32,
}

impl FrozenClock {
    pub fn at(epoch_seconds: u32) -> Self {
        Self {
            now: AtomicU32::new(epoch_seconds),
        }
    }

    pub fn set(&self, epoch_seconds: u32) {
        self.now.store(epoch_seconds, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u32) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn epoch_seconds(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
