//! Small TTL cache for settings-style reads.
//!
//! Office hours change rarely but are read on every dashboard render, so the
//! client caches the last daemon answer for a short window. `clear` drops the
//! entry after a successful save so the next read refetches.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::error::Result;

struct Entry<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

pub struct TtlCache<T: Clone> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: Mutex<Option<Entry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Returns the cached value if it is still fresh, otherwise calls `fetch`
    /// and caches its result. A failed fetch leaves the cache empty.
    pub fn get_or_fetch_with<F>(&self, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let now = self.clock.now();
        let mut entry = self.entry.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(cached) = entry.as_ref() {
            if now.signed_duration_since(cached.fetched_at) < self.ttl {
                return Ok(cached.value.clone());
            }
        }
        let value = fetch()?;
        *entry = Some(Entry {
            value: value.clone(),
            fetched_at: now,
        });
        Ok(value)
    }

    pub fn clear(&self) {
        let mut entry = self.entry.lock().unwrap_or_else(|poison| poison.into_inner());
        *entry = None;
    }
}
