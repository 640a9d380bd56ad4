//! Shared daemon state: the session store plus push fan-out.
//!
//! Every mutating operation takes `now` explicitly so the transition rules
//! are deterministic under test; the IPC layer passes `Utc::now()`. Each
//! successful mutation publishes one tenant-scoped roster event: an Insert
//! when a heartbeat self-heals a missing session (subscribers must reload to
//! pick up joined display data), an Update with the full row otherwise.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use shiftwatch_protocol::{OfficeHours, RosterEvent, Session};

use crate::push::Fanout;
use crate::store::{BreakClose, CreateOutcome, Store};

pub struct SharedState {
    store: Store,
    fanout: Fanout,
}

/// Outcome of a heartbeat, distinguishing the self-heal path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub session: Session,
    pub healed: bool,
}

/// Outcome of `end_break`; closing twice is a warning no-op, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndBreakOutcome {
    Closed(Session),
    NoOpenBreak(Session),
}

impl SharedState {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            fanout: Fanout::new(),
        }
    }

    /// Refreshes `last_active_time`; creates the session if none is open.
    ///
    /// The self-heal insert tolerates a concurrent writer: a uniqueness
    /// conflict means someone else already healed the session, so we fall
    /// back to touching the row they created.
    pub fn heartbeat(
        &self,
        employee_id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatOutcome, String> {
        if let Some(session) = self.store.touch_last_active(employee_id, now)? {
            self.publish_update(&session);
            return Ok(HeartbeatOutcome {
                session,
                healed: false,
            });
        }

        match self.store.create_open_session(employee_id, tenant_id, now)? {
            CreateOutcome::Created(session) => {
                info!(
                    employee_id = %employee_id,
                    tenant_id = %tenant_id,
                    "Heartbeat self-healed a missing session"
                );
                self.fanout.publish(&RosterEvent::Insert {
                    tenant_id: session.tenant_id.clone(),
                    employee_id: session.employee_id.clone(),
                });
                Ok(HeartbeatOutcome {
                    session,
                    healed: true,
                })
            }
            CreateOutcome::AlreadyOpen => {
                // Lost the insert race; the winner's row is the open session.
                let session = self
                    .store
                    .touch_last_active(employee_id, now)?
                    .ok_or_else(|| "Open session vanished after insert conflict".to_string())?;
                self.publish_update(&session);
                Ok(HeartbeatOutcome {
                    session,
                    healed: false,
                })
            }
        }
    }

    /// Idle-directed update from the monitor's idle timer.
    pub fn mark_idle(
        &self,
        employee_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<Option<Session>, String> {
        let session = self
            .store
            .set_status(employee_id, shiftwatch_protocol::PresenceStatus::Idle)?;
        if let Some(session) = &session {
            self.publish_update(session);
        }
        Ok(session)
    }

    /// Fresh interaction after idle: Online with a new `last_active_time`.
    pub fn resume(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, String> {
        let session = self.store.resume(employee_id, now)?;
        if let Some(session) = &session {
            self.publish_update(session);
        }
        Ok(session)
    }

    /// Starts a break on the open session. `Ok(None)` means no open session;
    /// the IPC layer surfaces that as a `no_active_session` error.
    pub fn start_break(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, String> {
        let session = self.store.begin_break(employee_id, now)?;
        if let Some(session) = &session {
            self.publish_update(session);
        }
        Ok(session)
    }

    pub fn end_break(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EndBreakOutcome>, String> {
        match self.store.finish_break(employee_id, now)? {
            BreakClose::Closed { session, minutes } => {
                info!(
                    employee_id = %employee_id,
                    minutes,
                    "Break closed"
                );
                self.publish_update(&session);
                Ok(Some(EndBreakOutcome::Closed(session)))
            }
            BreakClose::NoOpenBreak => {
                warn!(employee_id = %employee_id, "end_break with no open break; ignoring");
                let session = self
                    .store
                    .get_open_session(employee_id)?
                    .ok_or_else(|| "Open session vanished during end_break".to_string())?;
                Ok(Some(EndBreakOutcome::NoOpenBreak(session)))
            }
            BreakClose::NoSession => Ok(None),
        }
    }

    /// Closes the open session. Idempotent: a second logout is a silent
    /// no-op and reports `closed: false`.
    pub fn logout(
        &self,
        employee_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, String> {
        match self.store.close_session(employee_id, reason, now)? {
            Some(session) => {
                info!(
                    employee_id = %employee_id,
                    reason = reason.unwrap_or("-"),
                    "Session closed"
                );
                self.publish_update(&session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn roster_page(
        &self,
        tenant_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Session>, bool), String> {
        self.store.list_open_sessions(tenant_id, page, page_size)
    }

    pub fn office_hours(&self, tenant_id: &str) -> Result<Option<OfficeHours>, String> {
        self.store.get_office_hours(tenant_id)
    }

    pub fn save_office_hours(&self, hours: &OfficeHours) -> Result<(), String> {
        self.store.save_office_hours(hours)
    }

    pub fn subscribe(&self, tenant_id: &str) -> (u64, std::sync::mpsc::Receiver<RosterEvent>) {
        self.fanout.subscribe(tenant_id)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.fanout.unsubscribe(id);
    }

    fn publish_update(&self, session: &Session) {
        self.fanout.publish(&RosterEvent::Update {
            tenant_id: session.tenant_id.clone(),
            session: session.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shiftwatch_protocol::PresenceStatus;

    fn test_state() -> (tempfile::TempDir, SharedState) {
        let temp = tempfile::tempdir().expect("temp dir");
        let store = Store::new(temp.path().join("presence.db")).expect("store init");
        (temp, SharedState::new(store))
    }

    fn now() -> DateTime<Utc> {
        "2026-08-26T09:00:00Z".parse().expect("fixed now")
    }

    #[test]
    fn heartbeat_self_heals_exactly_one_session() {
        let (_temp, state) = test_state();
        let outcome = state.heartbeat("emp-1", "tenant-1", now()).expect("heartbeat");
        assert!(outcome.healed);
        assert_eq!(outcome.session.status, PresenceStatus::Online);
        assert_eq!(outcome.session.login_time, outcome.session.last_active_time);

        // A second heartbeat finds the healed session and only touches it.
        let second = state
            .heartbeat("emp-1", "tenant-1", now() + Duration::seconds(30))
            .expect("second heartbeat");
        assert!(!second.healed);
        assert_eq!(second.session.login_time, now().to_rfc3339());
    }

    #[test]
    fn heartbeat_insert_race_is_swallowed() {
        // Simulate the losing side of the race: the row appears between the
        // touch and the insert attempt, so create reports AlreadyOpen.
        let (_temp, state) = test_state();
        state.heartbeat("emp-1", "tenant-1", now()).expect("winner heartbeat");
        let outcome = state
            .heartbeat("emp-1", "tenant-1", now() + Duration::seconds(1))
            .expect("loser heartbeat must not error");
        assert!(!outcome.healed);
    }

    #[test]
    fn heartbeat_emits_insert_on_heal_and_update_after() {
        let (_temp, state) = test_state();
        let (_id, rx) = state.subscribe("tenant-1");

        state.heartbeat("emp-1", "tenant-1", now()).expect("heartbeat");
        let event = rx.try_recv().expect("insert event");
        assert!(matches!(event, RosterEvent::Insert { .. }));

        state
            .heartbeat("emp-1", "tenant-1", now() + Duration::seconds(30))
            .expect("heartbeat");
        let event = rx.try_recv().expect("update event");
        assert!(matches!(event, RosterEvent::Update { .. }));
    }

    #[test]
    fn start_break_without_session_reports_none() {
        let (_temp, state) = test_state();
        assert!(state
            .start_break("emp-ghost", now())
            .expect("start break")
            .is_none());
    }

    #[test]
    fn break_accounting_round_trip() {
        let (_temp, state) = test_state();
        state.heartbeat("emp-1", "tenant-1", now()).expect("login");

        let t0 = now() + Duration::minutes(20);
        let session = state
            .start_break("emp-1", t0)
            .expect("start break")
            .expect("open session");
        assert_eq!(session.status, PresenceStatus::Break);

        let outcome = state
            .end_break("emp-1", t0 + Duration::minutes(7))
            .expect("end break")
            .expect("session exists");
        let EndBreakOutcome::Closed(session) = outcome else {
            panic!("expected a closed break");
        };
        assert_eq!(session.total_break_minutes, 7);
        assert!(session.current_break_start.is_none());
        assert_eq!(session.status, PresenceStatus::Online);
    }

    #[test]
    fn duplicate_end_break_does_not_double_charge() {
        let (_temp, state) = test_state();
        state.heartbeat("emp-1", "tenant-1", now()).expect("login");
        state
            .start_break("emp-1", now() + Duration::minutes(1))
            .expect("start break");
        state
            .end_break("emp-1", now() + Duration::minutes(6))
            .expect("first end");

        let outcome = state
            .end_break("emp-1", now() + Duration::minutes(8))
            .expect("second end")
            .expect("session exists");
        let EndBreakOutcome::NoOpenBreak(session) = outcome else {
            panic!("expected a no-op");
        };
        assert_eq!(session.total_break_minutes, 5);
    }

    #[test]
    fn logout_is_idempotent() {
        let (_temp, state) = test_state();
        state.heartbeat("emp-1", "tenant-1", now()).expect("login");

        let closed = state
            .logout("emp-1", Some("Manual logout"), now() + Duration::minutes(5))
            .expect("first logout");
        assert!(closed);

        let closed_again = state
            .logout("emp-1", None, now() + Duration::minutes(6))
            .expect("second logout must not error");
        assert!(!closed_again);
    }

    #[test]
    fn mark_idle_persists_status_without_touching_last_active() {
        let (_temp, state) = test_state();
        state.heartbeat("emp-1", "tenant-1", now()).expect("login");
        let session = state
            .mark_idle("emp-1", now() + Duration::minutes(4))
            .expect("mark idle")
            .expect("open session");
        assert_eq!(session.status, PresenceStatus::Idle);
        assert_eq!(session.last_active_time, now().to_rfc3339());

        let session = state
            .resume("emp-1", now() + Duration::minutes(5))
            .expect("resume")
            .expect("open session");
        assert_eq!(session.status, PresenceStatus::Online);
        assert_eq!(
            session.last_active_time,
            (now() + Duration::minutes(5)).to_rfc3339()
        );
    }

    #[test]
    fn logout_update_carries_closed_row_for_live_patching() {
        let (_temp, state) = test_state();
        state.heartbeat("emp-1", "tenant-1", now()).expect("login");
        let (_id, rx) = state.subscribe("tenant-1");

        state
            .logout("emp-1", Some("Auto Logout due to inactivity"), now())
            .expect("logout");
        let event = rx.try_recv().expect("update event");
        let RosterEvent::Update { session, .. } = event else {
            panic!("expected update");
        };
        assert!(session.logout_time.is_some());
        assert_eq!(
            session.logout_reason.as_deref(),
            Some("Auto Logout due to inactivity")
        );
    }

    #[test]
    fn roster_page_reflects_open_sessions_only() {
        let (_temp, state) = test_state();
        state.heartbeat("emp-1", "tenant-1", now()).expect("login 1");
        state
            .heartbeat("emp-2", "tenant-1", now() + Duration::seconds(1))
            .expect("login 2");
        state.logout("emp-1", None, now() + Duration::minutes(1)).expect("logout");

        let (rows, has_more) = state.roster_page("tenant-1", 0, 10).expect("roster");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].employee_id, "emp-2");
        assert!(!has_more);
    }
}
