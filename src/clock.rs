//! # Clock
//!
//! Source of "now" for every expiry decision. Lazy expiry, timeout resets and timer
//! scheduling all read the same injected clock so they can never disagree.

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock anchored to the tokio timer, so paused-time tests advance it together with
/// every scheduled timeout.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor_instant.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}

/// Time left until `instant`, zero if it already passed
pub fn duration_until(clock: &dyn Clock, instant: DateTime<Utc>) -> Duration {
    (instant - clock.now()).to_std().unwrap_or(Duration::ZERO)
}

/// `now + duration` on the given clock
pub fn after(clock: &dyn Clock, duration: Duration) -> crate::Result<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(duration)
        .map_err(|e| crate::ComponentError::InvalidTimeout(e.to_string()))?;
    clock
        .now()
        .checked_add_signed(delta)
        .ok_or_else(|| crate::ComponentError::InvalidTimeout(format!("{duration:?} overflows")))
}
