use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub trait TimeSource {
    fn now(&self) -> Instant;
}

/// A simple time source that returns the current time using `Instant::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstantTimeSrc(());

impl InstantTimeSrc {
    pub fn new() -> Self {
        InstantTimeSrc(())
    }
}

impl TimeSource for InstantTimeSrc {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same instant, so a tracker holding one clone observes
/// `advance_time` calls made through another.
#[derive(Clone, Debug)]
pub struct MockTimeSource {
    current_instant: Arc<Mutex<Instant>>,
}

impl MockTimeSource {
    pub fn new(start_instant: Instant) -> Self {
        MockTimeSource {
            current_instant: Arc::new(Mutex::new(start_instant)),
        }
    }

    pub fn advance_time(&self, duration: Duration) {
        *self.current_instant.lock() += duration;
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Instant {
        *self.current_instant.lock()
    }
}
