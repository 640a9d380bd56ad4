//! Cached office-hours view.
//!
//! Office hours are display-only configuration, read far more often than
//! they change. Reads go through a process-scoped [`TtlCache`]; a successful
//! save clears the cache so the next read refetches.

use chrono::Duration;
use shiftwatch_protocol::OfficeHours;
use std::sync::Arc;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::error::Result;
use crate::timefmt::format_working_days;

const CACHE_TTL_SECS: i64 = 60;

/// Daemon-facing office-hours operations. The production impl is
/// [`DaemonClient`]; tests substitute a fake.
///
/// [`DaemonClient`]: crate::client::DaemonClient
pub trait HoursSource {
    fn get_office_hours(&self, tenant_id: &str) -> Result<Option<OfficeHours>>;
    fn save_office_hours(&self, hours: &OfficeHours) -> Result<()>;
}

impl HoursSource for crate::client::DaemonClient {
    fn get_office_hours(&self, tenant_id: &str) -> Result<Option<OfficeHours>> {
        crate::client::DaemonClient::get_office_hours(self, tenant_id)
    }

    fn save_office_hours(&self, hours: &OfficeHours) -> Result<()> {
        crate::client::DaemonClient::save_office_hours(self, hours)
    }
}

pub struct OfficeHoursView<S: HoursSource> {
    source: S,
    tenant_id: String,
    cache: TtlCache<Option<OfficeHours>>,
}

impl<S: HoursSource> OfficeHoursView<S> {
    pub fn new(source: S, tenant_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            tenant_id: tenant_id.into(),
            cache: TtlCache::new(clock, Duration::seconds(CACHE_TTL_SECS)),
        }
    }

    /// Returns the tenant's office hours, cached for up to a minute.
    pub fn get(&self) -> Result<Option<OfficeHours>> {
        self.cache
            .get_or_fetch_with(|| self.source.get_office_hours(&self.tenant_id))
    }

    /// Persists new office hours and invalidates the cache.
    pub fn save(&self, hours: &OfficeHours) -> Result<()> {
        self.source.save_office_hours(hours)?;
        self.cache.clear();
        Ok(())
    }
}

/// "08:30-17:00 Europe/Berlin (Mon, Tue, Wed, Thu, Fri)", or a placeholder
/// when the tenant never configured hours.
pub fn format_office_hours(hours: Option<&OfficeHours>) -> String {
    match hours {
        Some(hours) => format!(
            "{}-{} {} ({})",
            hours.start_time,
            hours.end_time,
            hours.timezone,
            format_working_days(&hours.working_days)
        ),
        None => "not configured".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeSource {
        gets: AtomicUsize,
        stored: Mutex<Option<OfficeHours>>,
    }

    impl FakeSource {
        fn new(stored: Option<OfficeHours>) -> Self {
            Self {
                gets: AtomicUsize::new(0),
                stored: Mutex::new(stored),
            }
        }
    }

    impl HoursSource for &FakeSource {
        fn get_office_hours(&self, _tenant_id: &str) -> Result<Option<OfficeHours>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.stored.lock().unwrap().clone())
        }

        fn save_office_hours(&self, hours: &OfficeHours) -> Result<()> {
            *self.stored.lock().unwrap() = Some(hours.clone());
            Ok(())
        }
    }

    fn sample_hours() -> OfficeHours {
        OfficeHours {
            tenant_id: "tenant-1".to_string(),
            start_time: "08:30".to_string(),
            end_time: "17:00".to_string(),
            timezone: "Europe/Berlin".to_string(),
            working_days: vec![0, 1, 2, 3, 4],
        }
    }

    fn clock() -> Arc<ManualClock> {
        let start: DateTime<Utc> = "2026-08-26T09:00:00Z".parse().expect("start");
        Arc::new(ManualClock::new(start))
    }

    #[test]
    fn reads_are_cached_within_the_ttl() {
        let source = FakeSource::new(Some(sample_hours()));
        let view = OfficeHoursView::new(&source, "tenant-1", clock());

        assert!(view.get().unwrap().is_some());
        assert!(view.get().unwrap().is_some());
        assert_eq!(source.gets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn save_invalidates_the_cache() {
        let source = FakeSource::new(None);
        let view = OfficeHoursView::new(&source, "tenant-1", clock());

        assert!(view.get().unwrap().is_none());
        view.save(&sample_hours()).unwrap();
        assert!(view.get().unwrap().is_some());
        assert_eq!(source.gets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn formats_hours_for_display() {
        assert_eq!(
            format_office_hours(Some(&sample_hours())),
            "08:30-17:00 Europe/Berlin (Mon, Tue, Wed, Thu, Fri)"
        );
        assert_eq!(format_office_hours(None), "not configured");
    }
}
