//! Injectable wall clock.
//!
//! Every time-dependent component takes a `Clock` instead of calling
//! `Utc::now()` directly, so the state-machine and timer tests are
//! deterministic.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock with a settable instant.
pub struct ManualClock {
    instant: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock().unwrap_or_else(|poison| poison.into_inner()) = instant;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut instant = self.instant.lock().unwrap_or_else(|poison| poison.into_inner());
        *instant += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
