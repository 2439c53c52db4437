//! Wall-clock source.
//!
//! Timestamps and schedule calculations go through [`Clock`] so tests can
//! pin "now" (see `testing::ManualClock`). Waiting still uses tokio timers.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
