//! Time source for the rate governor.
//!
//! Production uses `SystemClock`. Tests drive the sliding windows with
//! `ManualClock` instead of sleeping.

use chrono::{DateTime, Utc};

/// Anything that can tell the governor what time it is.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
