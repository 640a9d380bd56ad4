//! Presence aggregator for a tenant's roster view.
//!
//! Holds the fetched pages of open sessions and applies push events on top.
//! Display values are never stored: every render re-derives presence from
//! the raw rows at the caller's `now`, so a 1-second tick keeps idle and
//! break counters moving without any refetch.

use chrono::{DateTime, Utc};
use shiftwatch_protocol::{derive_presence, DerivedPresence, RosterEvent, Session};

use crate::error::Result;

/// Where roster pages come from. The production impl wraps [`DaemonClient`];
/// tests substitute a fake to count fetches.
///
/// [`DaemonClient`]: crate::client::DaemonClient
pub trait RosterSource {
    fn fetch_page(&self, tenant_id: &str, page: usize, page_size: usize)
        -> Result<(Vec<Session>, bool)>;
}

impl RosterSource for crate::client::DaemonClient {
    fn fetch_page(
        &self,
        tenant_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Session>, bool)> {
        let page = self.get_roster(tenant_id, page, page_size)?;
        Ok((page.sessions, page.has_more))
    }
}

/// One rendered roster row. A record whose timestamps cannot be parsed
/// carries [`DerivedPresence::offline`]; the view shows "Offline, N/A".
#[derive(Debug, Clone)]
pub struct DisplayRow {
    pub session: Session,
    pub derived: DerivedPresence,
}

pub struct Roster<S: RosterSource> {
    source: S,
    tenant_id: String,
    page_size: usize,
    pages_loaded: usize,
    sessions: Vec<Session>,
    has_more: bool,
    filter: String,
}

impl<S: RosterSource> Roster<S> {
    pub fn new(source: S, tenant_id: impl Into<String>, page_size: usize) -> Self {
        Self {
            source,
            tenant_id: tenant_id.into(),
            page_size,
            pages_loaded: 0,
            sessions: Vec::new(),
            has_more: false,
            filter: String::new(),
        }
    }

    /// Loads page 0, replacing anything already held.
    pub fn load_initial(&mut self) -> Result<()> {
        let (sessions, has_more) = self.source.fetch_page(&self.tenant_id, 0, self.page_size)?;
        self.sessions = sessions;
        self.has_more = has_more;
        self.pages_loaded = 1;
        Ok(())
    }

    /// Fetches the next page and appends it. No-op when the last page was
    /// short.
    pub fn load_more(&mut self) -> Result<()> {
        if !self.has_more {
            return Ok(());
        }
        let (sessions, has_more) =
            self.source
                .fetch_page(&self.tenant_id, self.pages_loaded, self.page_size)?;
        self.sessions.extend(sessions);
        self.has_more = has_more;
        self.pages_loaded += 1;
        Ok(())
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Applies one push event.
    ///
    /// Updates patch the matching employee's row by rebuilding the vector
    /// (rows are values, not mutated in place); an update for an employee we
    /// are not holding is ignored. Inserts carry no joined display data, so
    /// they force a reload from page 0.
    pub fn apply_event(&mut self, event: RosterEvent) -> Result<()> {
        match event {
            RosterEvent::Update { session, .. } => {
                self.sessions = self
                    .sessions
                    .iter()
                    .map(|existing| {
                        if existing.employee_id == session.employee_id {
                            merge_update(existing, &session)
                        } else {
                            existing.clone()
                        }
                    })
                    .collect();
                Ok(())
            }
            RosterEvent::Insert { .. } => self.load_initial(),
        }
    }

    /// Sets the in-memory search filter. Matches name, team, and employee id,
    /// case-insensitively. Never refetches.
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
    }

    /// Re-derives presence for the currently filtered rows at `now`.
    pub fn display_rows(&self, now: DateTime<Utc>) -> Vec<DisplayRow> {
        self.sessions
            .iter()
            .filter(|session| self.matches_filter(session))
            .map(|session| DisplayRow {
                session: session.clone(),
                derived: derive_presence(session, now),
            })
            .collect()
    }

    fn matches_filter(&self, session: &Session) -> bool {
        let needle = self.filter.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let name_hit = session
            .employee_name
            .as_deref()
            .map(|name| name.to_lowercase().contains(&needle))
            .unwrap_or(false);
        let team_hit = session
            .team
            .as_deref()
            .map(|team| team.to_lowercase().contains(&needle))
            .unwrap_or(false);
        name_hit || team_hit || session.employee_id.to_lowercase().contains(&needle)
    }
}

/// An update event carries the daemon's view of the row, which lacks the
/// joined display fields. Keep the ones we already have.
fn merge_update(existing: &Session, incoming: &Session) -> Session {
    let mut merged = incoming.clone();
    if merged.employee_name.is_none() {
        merged.employee_name = existing.employee_name.clone();
    }
    if merged.team.is_none() {
        merged.team = existing.team.clone();
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PresenceError;
    use chrono::Duration;
    use shiftwatch_protocol::PresenceStatus;
    use std::cell::RefCell;

    struct FakeSource {
        pages: RefCell<Vec<(Vec<Session>, bool)>>,
        calls: RefCell<Vec<usize>>,
    }

    impl FakeSource {
        fn new(pages: Vec<(Vec<Session>, bool)>) -> Self {
            Self {
                pages: RefCell::new(pages),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl RosterSource for FakeSource {
        fn fetch_page(
            &self,
            _tenant_id: &str,
            page: usize,
            _page_size: usize,
        ) -> Result<(Vec<Session>, bool)> {
            self.calls.borrow_mut().push(page);
            let mut pages = self.pages.borrow_mut();
            if pages.is_empty() {
                return Err(PresenceError::Unavailable("no more scripted pages".into()));
            }
            Ok(pages.remove(0))
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-08-26T14:00:00Z".parse().expect("now")
    }

    fn session(employee_id: &str, name: &str, team: &str) -> Session {
        Session {
            employee_id: employee_id.to_string(),
            tenant_id: "tenant-1".to_string(),
            employee_name: Some(name.to_string()),
            team: Some(team.to_string()),
            login_time: (now() - Duration::hours(1)).to_rfc3339(),
            last_active_time: (now() - Duration::seconds(30)).to_rfc3339(),
            status: PresenceStatus::Online,
            total_break_minutes: 0,
            current_break_start: None,
            logout_time: None,
            logout_reason: None,
        }
    }

    #[test]
    fn load_more_appends_and_tracks_has_more() {
        let source = FakeSource::new(vec![
            (vec![session("emp-1", "Dana", "Collections")], true),
            (vec![session("emp-2", "Rami", "Support")], false),
        ]);
        let mut roster = Roster::new(source, "tenant-1", 1);

        roster.load_initial().unwrap();
        assert!(roster.has_more());
        roster.load_more().unwrap();
        assert!(!roster.has_more());
        assert_eq!(roster.display_rows(now()).len(), 2);

        // A further load_more with nothing left must not hit the source.
        roster.load_more().unwrap();
        assert_eq!(*roster.source.calls.borrow(), vec![0, 1]);
    }

    #[test]
    fn update_event_patches_in_place_without_refetch() {
        let source = FakeSource::new(vec![(
            vec![session("emp-1", "Dana", "Collections")],
            false,
        )]);
        let mut roster = Roster::new(source, "tenant-1", 100);
        roster.load_initial().unwrap();

        let mut updated = session("emp-1", "Dana", "Collections");
        updated.status = PresenceStatus::Break;
        updated.current_break_start = Some(now().to_rfc3339());
        updated.employee_name = None;
        updated.team = None;

        roster
            .apply_event(RosterEvent::Update {
                tenant_id: "tenant-1".to_string(),
                session: updated,
            })
            .unwrap();

        let rows = roster.display_rows(now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].derived.status, PresenceStatus::Break);
        // Joined display data survives the patch.
        assert_eq!(rows[0].session.employee_name.as_deref(), Some("Dana"));
        // Exactly one fetch: the initial load.
        assert_eq!(*roster.source.calls.borrow(), vec![0]);
    }

    #[test]
    fn insert_event_triggers_full_reload() {
        let source = FakeSource::new(vec![
            (vec![session("emp-1", "Dana", "Collections")], false),
            (
                vec![
                    session("emp-1", "Dana", "Collections"),
                    session("emp-2", "Rami", "Support"),
                ],
                false,
            ),
        ]);
        let mut roster = Roster::new(source, "tenant-1", 100);
        roster.load_initial().unwrap();

        roster
            .apply_event(RosterEvent::Insert {
                tenant_id: "tenant-1".to_string(),
                employee_id: "emp-2".to_string(),
            })
            .unwrap();

        assert_eq!(roster.display_rows(now()).len(), 2);
        // Two fetches, both of page 0.
        assert_eq!(*roster.source.calls.borrow(), vec![0, 0]);
    }

    #[test]
    fn update_for_unknown_employee_is_ignored() {
        let source = FakeSource::new(vec![(
            vec![session("emp-1", "Dana", "Collections")],
            false,
        )]);
        let mut roster = Roster::new(source, "tenant-1", 100);
        roster.load_initial().unwrap();

        roster
            .apply_event(RosterEvent::Update {
                tenant_id: "tenant-1".to_string(),
                session: session("emp-9", "Noor", "Sales"),
            })
            .unwrap();

        let rows = roster.display_rows(now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session.employee_id, "emp-1");
    }

    #[test]
    fn filter_matches_name_team_and_id_without_refetch() {
        let source = FakeSource::new(vec![(
            vec![
                session("emp-1", "Dana Haddad", "Collections"),
                session("emp-2", "Rami Aboud", "Support"),
            ],
            false,
        )]);
        let mut roster = Roster::new(source, "tenant-1", 100);
        roster.load_initial().unwrap();

        roster.set_filter("dana");
        assert_eq!(roster.display_rows(now()).len(), 1);

        roster.set_filter("support");
        assert_eq!(roster.display_rows(now()).len(), 1);

        roster.set_filter("EMP-");
        assert_eq!(roster.display_rows(now()).len(), 2);

        roster.set_filter("nobody");
        assert!(roster.display_rows(now()).is_empty());

        assert_eq!(*roster.source.calls.borrow(), vec![0]);
    }

    #[test]
    fn tick_rederives_without_touching_stored_rows() {
        let source = FakeSource::new(vec![(
            vec![session("emp-1", "Dana", "Collections")],
            false,
        )]);
        let mut roster = Roster::new(source, "tenant-1", 100);
        roster.load_initial().unwrap();

        let rows = roster.display_rows(now());
        assert_eq!(rows[0].derived.status, PresenceStatus::Online);

        // Four minutes later the same stored row renders Idle.
        let later = now() + Duration::minutes(4);
        let rows = roster.display_rows(later);
        assert_eq!(rows[0].derived.status, PresenceStatus::Idle);
        assert_eq!(rows[0].session.status, PresenceStatus::Online);
    }

    #[test]
    fn broken_row_degrades_to_offline_instead_of_failing() {
        let mut broken = session("emp-1", "Dana", "Collections");
        broken.last_active_time = "garbage".to_string();
        let source = FakeSource::new(vec![(vec![broken], false)]);
        let mut roster = Roster::new(source, "tenant-1", 100);
        roster.load_initial().unwrap();

        let rows = roster.display_rows(now());
        assert_eq!(rows[0].derived, DerivedPresence::offline());
    }
}
