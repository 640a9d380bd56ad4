//! The persisted session record and the presence state machine.
//!
//! A session is one login-to-logout span for an employee. The daemon persists
//! the last explicitly set status; Idle and Offline promotion are derived at
//! read time from `last_active_time` and the current instant, so every reader
//! (daemon responses, roster ticks) classifies with the same rules and the
//! same thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inactivity longer than this promotes Online to Idle at read time.
pub const IDLE_AFTER_MINUTES: i64 = 3;

/// Inactivity longer than this promotes a non-break session to Offline.
/// Covers abandoned tabs that never sent an explicit logout.
pub const OFFLINE_AFTER_MINUTES: i64 = 5;

/// Client-side heartbeat cadence. The daemon does not enforce this; callers
/// throttle themselves.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Break,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Idle => "idle",
            PresenceStatus::Break => "break",
            PresenceStatus::Offline => "offline",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "online" => Some(PresenceStatus::Online),
            "idle" => Some(PresenceStatus::Idle),
            "break" => Some(PresenceStatus::Break),
            "offline" => Some(PresenceStatus::Offline),
            _ => None,
        }
    }
}

/// Persisted session row, shared between the daemon and its clients.
///
/// Timestamps are RFC3339 UTC strings. `total_break_minutes` only counts
/// closed break intervals; an open break is measured on the fly from
/// `current_break_start` and never written back until the break ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub employee_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    pub login_time: String,
    pub last_active_time: String,
    pub status: PresenceStatus,
    #[serde(default)]
    pub total_break_minutes: i64,
    #[serde(default)]
    pub current_break_start: Option<String>,
    #[serde(default)]
    pub logout_time: Option<String>,
    #[serde(default)]
    pub logout_reason: Option<String>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.logout_time.is_none()
    }
}

/// Display values computed from a session and "now". Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedPresence {
    pub status: PresenceStatus,
    /// Current inactivity streak in whole minutes; 0 unless derived Idle.
    pub idle_minutes: i64,
    /// Closed break total plus the open break's elapsed minutes, if any.
    pub break_minutes: i64,
    pub productive_minutes: i64,
}

impl DerivedPresence {
    /// Fallback when a row's timestamps cannot be parsed. The roster renders
    /// this as "Offline, N/A" instead of failing the whole view.
    pub fn offline() -> Self {
        Self {
            status: PresenceStatus::Offline,
            idle_minutes: 0,
            break_minutes: 0,
            productive_minutes: 0,
        }
    }
}

/// Classifies a session and computes its duration metrics at `now`.
///
/// Threshold comparisons are strict and made on elapsed seconds, so an
/// inactivity streak of 3m01s already counts as Idle while 2m59s does not.
/// Displayed minute values are floored.
pub fn derive_presence(session: &Session, now: DateTime<Utc>) -> DerivedPresence {
    let (Some(login), Some(last_active)) = (
        parse_rfc3339(&session.login_time),
        parse_rfc3339(&session.last_active_time),
    ) else {
        return DerivedPresence::offline();
    };

    let inactive_secs = now.signed_duration_since(last_active).num_seconds().max(0);
    let minutes_inactive = inactive_secs / 60;

    let status = if session.logout_time.is_some() {
        PresenceStatus::Offline
    } else {
        match session.status {
            // An open break is explicit; it is never promoted by inactivity.
            PresenceStatus::Break => PresenceStatus::Break,
            PresenceStatus::Offline => PresenceStatus::Offline,
            PresenceStatus::Online => {
                if inactive_secs > OFFLINE_AFTER_MINUTES * 60 {
                    PresenceStatus::Offline
                } else if inactive_secs > IDLE_AFTER_MINUTES * 60 {
                    PresenceStatus::Idle
                } else {
                    PresenceStatus::Online
                }
            }
            PresenceStatus::Idle => {
                if inactive_secs > OFFLINE_AFTER_MINUTES * 60 {
                    PresenceStatus::Offline
                } else {
                    PresenceStatus::Idle
                }
            }
        }
    };

    let idle_minutes = if status == PresenceStatus::Idle {
        minutes_inactive
    } else {
        0
    };

    let open_break_minutes = session
        .current_break_start
        .as_deref()
        .and_then(parse_rfc3339)
        .map(|start| now.signed_duration_since(start).num_seconds().max(0) / 60)
        .unwrap_or(0);
    let break_minutes = session.total_break_minutes + open_break_minutes;

    // Open-break minutes are intentionally not subtracted here; only closed
    // break time and the current idle streak reduce productive time.
    let session_minutes = now.signed_duration_since(login).num_seconds().max(0) / 60;
    let productive_minutes =
        (session_minutes - session.total_break_minutes - idle_minutes).max(0);

    DerivedPresence {
        status,
        idle_minutes,
        break_minutes,
        productive_minutes,
    }
}

/// Row-level change notification delivered to roster subscribers.
///
/// Inserts carry identifiers only: a new session needs joined display data
/// (name, team) that the event payload does not have, so consumers reload.
/// Updates carry the full row and can be patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RosterEvent {
    Insert {
        tenant_id: String,
        employee_id: String,
    },
    Update {
        tenant_id: String,
        session: Session,
    },
}

impl RosterEvent {
    pub fn tenant_id(&self) -> &str {
        match self {
            RosterEvent::Insert { tenant_id, .. } => tenant_id,
            RosterEvent::Update { tenant_id, .. } => tenant_id,
        }
    }
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2026-08-26T12:00:00Z".parse().expect("fixed now")
    }

    fn open_session(status: PresenceStatus, last_active: DateTime<Utc>) -> Session {
        Session {
            employee_id: "emp-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            employee_name: Some("Dana".to_string()),
            team: Some("Collections".to_string()),
            login_time: (now() - Duration::hours(2)).to_rfc3339(),
            last_active_time: last_active.to_rfc3339(),
            status,
            total_break_minutes: 0,
            current_break_start: None,
            logout_time: None,
            logout_reason: None,
        }
    }

    #[test]
    fn fresh_activity_stays_online() {
        let session = open_session(
            PresenceStatus::Online,
            now() - Duration::minutes(2) - Duration::seconds(59),
        );
        let derived = derive_presence(&session, now());
        assert_eq!(derived.status, PresenceStatus::Online);
        assert_eq!(derived.idle_minutes, 0);
    }

    #[test]
    fn idle_threshold_is_strict_on_seconds() {
        let session = open_session(
            PresenceStatus::Online,
            now() - Duration::minutes(3) - Duration::seconds(1),
        );
        let derived = derive_presence(&session, now());
        assert_eq!(derived.status, PresenceStatus::Idle);
        assert_eq!(derived.idle_minutes, 3);
    }

    #[test]
    fn four_minutes_inactive_is_idle() {
        let session = open_session(PresenceStatus::Online, now() - Duration::minutes(4));
        let derived = derive_presence(&session, now());
        assert_eq!(derived.status, PresenceStatus::Idle);
        assert_eq!(derived.idle_minutes, 4);
    }

    #[test]
    fn six_minutes_inactive_is_offline() {
        let session = open_session(PresenceStatus::Online, now() - Duration::minutes(6));
        let derived = derive_presence(&session, now());
        assert_eq!(derived.status, PresenceStatus::Offline);
        assert_eq!(derived.idle_minutes, 0);
    }

    #[test]
    fn break_is_never_promoted_by_inactivity() {
        let mut session = open_session(PresenceStatus::Break, now() - Duration::hours(1));
        session.current_break_start = Some((now() - Duration::minutes(50)).to_rfc3339());
        let derived = derive_presence(&session, now());
        assert_eq!(derived.status, PresenceStatus::Break);
    }

    #[test]
    fn logout_time_wins_over_everything() {
        let mut session = open_session(PresenceStatus::Online, now());
        session.logout_time = Some(now().to_rfc3339());
        let derived = derive_presence(&session, now());
        assert_eq!(derived.status, PresenceStatus::Offline);
    }

    #[test]
    fn open_break_minutes_are_added_to_display_total() {
        let mut session = open_session(PresenceStatus::Break, now());
        session.total_break_minutes = 12;
        session.current_break_start = Some((now() - Duration::minutes(7)).to_rfc3339());
        let derived = derive_presence(&session, now());
        assert_eq!(derived.break_minutes, 19);
    }

    #[test]
    fn productive_time_subtracts_closed_breaks_only() {
        // Login 120 minutes ago, 15 minutes of closed breaks, currently active.
        let mut session = open_session(PresenceStatus::Online, now() - Duration::seconds(30));
        session.login_time = (now() - Duration::minutes(120)).to_rfc3339();
        session.total_break_minutes = 15;
        let derived = derive_presence(&session, now());
        assert_eq!(derived.productive_minutes, 105);
    }

    #[test]
    fn productive_time_subtracts_current_idle_streak() {
        let mut session = open_session(PresenceStatus::Online, now() - Duration::minutes(10));
        session.login_time = (now() - Duration::minutes(120)).to_rfc3339();
        session.total_break_minutes = 15;
        let derived = derive_presence(&session, now());
        assert_eq!(derived.status, PresenceStatus::Idle);
        assert_eq!(derived.idle_minutes, 10);
        assert_eq!(derived.productive_minutes, 95);
    }

    #[test]
    fn productive_time_never_goes_negative() {
        let mut session = open_session(PresenceStatus::Online, now());
        session.login_time = (now() - Duration::minutes(5)).to_rfc3339();
        session.total_break_minutes = 30;
        let derived = derive_presence(&session, now());
        assert_eq!(derived.productive_minutes, 0);
    }

    #[test]
    fn persisted_idle_stays_idle_until_offline_promotion() {
        let session = open_session(PresenceStatus::Idle, now() - Duration::minutes(1));
        assert_eq!(derive_presence(&session, now()).status, PresenceStatus::Idle);

        let session = open_session(PresenceStatus::Idle, now() - Duration::minutes(6));
        assert_eq!(
            derive_presence(&session, now()).status,
            PresenceStatus::Offline
        );
    }

    #[test]
    fn unparseable_timestamps_degrade_to_offline_defaults() {
        let mut session = open_session(PresenceStatus::Online, now());
        session.last_active_time = "not-a-time".to_string();
        assert_eq!(derive_presence(&session, now()), DerivedPresence::offline());
    }

    #[test]
    fn roster_event_exposes_tenant() {
        let event = RosterEvent::Insert {
            tenant_id: "tenant-9".to_string(),
            employee_id: "emp-2".to_string(),
        };
        assert_eq!(event.tenant_id(), "tenant-9");
    }
}
