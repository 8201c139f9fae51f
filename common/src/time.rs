// A simple module to define the time types used in the project
//
// Timelocks, registry timestamps and event records read an injected Clock.
// Tests use a ManualClock and warp it forward instead of sleeping.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Seconds timestamps used to determine it using its type
pub type TimestampSeconds = u64;

#[inline]
pub fn get_current_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

// Return timestamp in seconds
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> TimestampSeconds;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampSeconds {
        get_current_time_in_seconds()
    }
}

/// Manually driven clock
///
/// Clones share the same underlying time, so a test can keep a handle
/// and warp the clock that a platform was built with.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: TimestampSeconds) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, timestamp: TimestampSeconds) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Move the clock forward, saturating at u64::MAX
    pub fn advance(&self, seconds: u64) -> TimestampSeconds {
        let mut current = self.now.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_add(seconds);
            match self
                .now
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampSeconds {
        self.now.load(Ordering::SeqCst)
    }
}
