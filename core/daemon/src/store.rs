//! SQLite persistence for shiftwatch-daemon.
//!
//! One `sessions` table holds every login-to-logout span; a partial unique
//! index guarantees at most one open row per employee, which is also what
//! makes the heartbeat self-heal race safe to swallow. Tenant isolation is a
//! query-level responsibility: every read is scoped by `tenant_id` or
//! `employee_id`, never by a database policy.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use shiftwatch_protocol::{parse_rfc3339, OfficeHours, PresenceStatus, Session};

pub struct Store {
    path: PathBuf,
}

/// Result of a self-healing insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Session),
    /// Another writer healed the session first; the conflict is success.
    AlreadyOpen,
}

/// Result of closing a break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakClose {
    Closed { session: Session, minutes: i64 },
    /// Open session exists but no break is in progress; no-op to avoid
    /// double-charging on duplicate calls.
    NoOpenBreak,
    NoSession,
}

impl Store {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let conn = Connection::open(&self.path)
            .map_err(|err| format!("Failed to open presence store: {}", err))?;
        conn.busy_timeout(std::time::Duration::from_secs(2))
            .map_err(|err| format!("Failed to set busy timeout: {}", err))?;
        f(&conn)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    employee_id TEXT NOT NULL,
                    tenant_id TEXT NOT NULL,
                    employee_name TEXT,
                    team TEXT,
                    login_time TEXT NOT NULL,
                    last_active_time TEXT NOT NULL,
                    status TEXT NOT NULL,
                    total_break_minutes INTEGER NOT NULL DEFAULT 0,
                    current_break_start TEXT,
                    logout_time TEXT,
                    logout_reason TEXT
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_open_session_per_employee
                    ON sessions (employee_id) WHERE logout_time IS NULL;
                CREATE INDEX IF NOT EXISTS idx_open_sessions_by_tenant
                    ON sessions (tenant_id) WHERE logout_time IS NULL;
                CREATE TABLE IF NOT EXISTS office_hours (
                    tenant_id TEXT PRIMARY KEY,
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    timezone TEXT NOT NULL,
                    working_days TEXT NOT NULL
                );",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    pub fn get_open_session(&self, employee_id: &str) -> Result<Option<Session>, String> {
        self.with_connection(|conn| get_open_session_tx(conn, employee_id))
    }

    /// Creates an open session for the employee. A uniqueness conflict on the
    /// open-session index means another caller won the race and is reported
    /// as [`CreateOutcome::AlreadyOpen`], not as an error.
    pub fn create_open_session(
        &self,
        employee_id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CreateOutcome, String> {
        self.with_connection(|conn| {
            let stamp = now.to_rfc3339();
            let changed = conn
                .execute(
                    "INSERT INTO sessions \
                        (employee_id, tenant_id, login_time, last_active_time, status) \
                     VALUES (?1, ?2, ?3, ?3, ?4) \
                     ON CONFLICT DO NOTHING",
                    params![employee_id, tenant_id, stamp, PresenceStatus::Online.as_str()],
                )
                .map_err(|err| format!("Failed to create session: {}", err))?;

            if changed == 0 {
                return Ok(CreateOutcome::AlreadyOpen);
            }

            match get_open_session_tx(conn, employee_id)? {
                Some(session) => Ok(CreateOutcome::Created(session)),
                None => Err("Created session row not found".to_string()),
            }
        })
    }

    /// Refreshes `last_active_time` on the open session. Returns the updated
    /// row, or `None` when the employee has no open session.
    pub fn touch_last_active(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, String> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET last_active_time = ?2 \
                     WHERE employee_id = ?1 AND logout_time IS NULL",
                    params![employee_id, now.to_rfc3339()],
                )
                .map_err(|err| format!("Failed to update last_active_time: {}", err))?;
            if changed == 0 {
                return Ok(None);
            }
            get_open_session_tx(conn, employee_id)
        })
    }

    /// Persists an explicit status on the open session without touching
    /// `last_active_time`. Used by the monitor's idle-directed update.
    pub fn set_status(
        &self,
        employee_id: &str,
        status: PresenceStatus,
    ) -> Result<Option<Session>, String> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET status = ?2 \
                     WHERE employee_id = ?1 AND logout_time IS NULL",
                    params![employee_id, status.as_str()],
                )
                .map_err(|err| format!("Failed to update status: {}", err))?;
            if changed == 0 {
                return Ok(None);
            }
            get_open_session_tx(conn, employee_id)
        })
    }

    /// Fresh interaction after an idle stretch: back to Online with a new
    /// `last_active_time`.
    pub fn resume(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, String> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET status = ?2, last_active_time = ?3 \
                     WHERE employee_id = ?1 AND logout_time IS NULL",
                    params![
                        employee_id,
                        PresenceStatus::Online.as_str(),
                        now.to_rfc3339()
                    ],
                )
                .map_err(|err| format!("Failed to resume session: {}", err))?;
            if changed == 0 {
                return Ok(None);
            }
            get_open_session_tx(conn, employee_id)
        })
    }

    pub fn begin_break(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, String> {
        self.with_connection(|conn| {
            let stamp = now.to_rfc3339();
            let changed = conn
                .execute(
                    "UPDATE sessions SET status = ?2, current_break_start = ?3, \
                        last_active_time = ?3 \
                     WHERE employee_id = ?1 AND logout_time IS NULL",
                    params![employee_id, PresenceStatus::Break.as_str(), stamp],
                )
                .map_err(|err| format!("Failed to begin break: {}", err))?;
            if changed == 0 {
                return Ok(None);
            }
            get_open_session_tx(conn, employee_id)
        })
    }

    /// Closes the open break: adds the elapsed whole minutes to the closed
    /// total, clears the break start, and returns to Online.
    pub fn finish_break(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BreakClose, String> {
        self.with_connection(|conn| {
            let Some(current) = get_open_session_tx(conn, employee_id)? else {
                return Ok(BreakClose::NoSession);
            };
            let Some(break_start) = current
                .current_break_start
                .as_deref()
                .and_then(parse_rfc3339)
            else {
                return Ok(BreakClose::NoOpenBreak);
            };

            let minutes = now.signed_duration_since(break_start).num_seconds().max(0) / 60;
            conn.execute(
                "UPDATE sessions SET total_break_minutes = total_break_minutes + ?2, \
                    current_break_start = NULL, status = ?3, last_active_time = ?4 \
                 WHERE employee_id = ?1 AND logout_time IS NULL",
                params![
                    employee_id,
                    minutes,
                    PresenceStatus::Online.as_str(),
                    now.to_rfc3339()
                ],
            )
            .map_err(|err| format!("Failed to finish break: {}", err))?;

            match get_open_session_tx(conn, employee_id)? {
                Some(session) => Ok(BreakClose::Closed { session, minutes }),
                None => Err("Session disappeared while closing break".to_string()),
            }
        })
    }

    /// Closes the open session, if any. Returns the closed row; `None` means
    /// there was nothing open, which callers treat as a silent no-op.
    pub fn close_session(
        &self,
        employee_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, String> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET logout_time = ?2, status = ?3, logout_reason = ?4 \
                     WHERE employee_id = ?1 AND logout_time IS NULL",
                    params![
                        employee_id,
                        now.to_rfc3339(),
                        PresenceStatus::Offline.as_str(),
                        reason
                    ],
                )
                .map_err(|err| format!("Failed to close session: {}", err))?;
            if changed == 0 {
                return Ok(None);
            }

            conn.query_row(
                "SELECT employee_id, tenant_id, employee_name, team, login_time, \
                        last_active_time, status, total_break_minutes, \
                        current_break_start, logout_time, logout_reason \
                 FROM sessions \
                 WHERE employee_id = ?1 AND logout_time = ?2",
                params![employee_id, now.to_rfc3339()],
                map_session_row,
            )
            .optional()
            .map_err(|err| format!("Failed to read closed session: {}", err))
        })
    }

    /// One page of the tenant's open sessions, newest login first.
    /// `has_more` is derived from whether the page came back full.
    pub fn list_open_sessions(
        &self,
        tenant_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Session>, bool), String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT employee_id, tenant_id, employee_name, team, login_time, \
                            last_active_time, status, total_break_minutes, \
                            current_break_start, logout_time, logout_reason \
                     FROM sessions \
                     WHERE tenant_id = ?1 AND logout_time IS NULL \
                     ORDER BY login_time DESC, id DESC \
                     LIMIT ?2 OFFSET ?3",
                )
                .map_err(|err| format!("Failed to prepare roster query: {}", err))?;

            let rows = stmt
                .query_map(
                    params![tenant_id, page_size as i64, (page * page_size) as i64],
                    map_session_row,
                )
                .map_err(|err| format!("Failed to read roster rows: {}", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(|err| format!("Failed to decode roster row: {}", err))?);
            }
            let has_more = sessions.len() == page_size;
            Ok((sessions, has_more))
        })
    }

    pub fn get_office_hours(&self, tenant_id: &str) -> Result<Option<OfficeHours>, String> {
        self.with_connection(|conn| {
            let row: Option<(String, String, String, String)> = conn
                .query_row(
                    "SELECT start_time, end_time, timezone, working_days \
                     FROM office_hours WHERE tenant_id = ?1",
                    params![tenant_id],
                    |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    },
                )
                .optional()
                .map_err(|err| format!("Failed to query office hours: {}", err))?;

            match row {
                Some((start_time, end_time, timezone, working_days)) => {
                    let working_days: Vec<u8> = serde_json::from_str(&working_days)
                        .map_err(|err| format!("Failed to parse working days: {}", err))?;
                    Ok(Some(OfficeHours {
                        tenant_id: tenant_id.to_string(),
                        start_time,
                        end_time,
                        timezone,
                        working_days,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    pub fn save_office_hours(&self, hours: &OfficeHours) -> Result<(), String> {
        self.with_connection(|conn| {
            let working_days = serde_json::to_string(&hours.working_days)
                .map_err(|err| format!("Failed to serialize working days: {}", err))?;
            conn.execute(
                "INSERT INTO office_hours \
                    (tenant_id, start_time, end_time, timezone, working_days) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(tenant_id) DO UPDATE SET \
                    start_time = excluded.start_time, \
                    end_time = excluded.end_time, \
                    timezone = excluded.timezone, \
                    working_days = excluded.working_days",
                params![
                    hours.tenant_id,
                    hours.start_time,
                    hours.end_time,
                    hours.timezone,
                    working_days
                ],
            )
            .map_err(|err| format!("Failed to save office hours: {}", err))?;
            Ok(())
        })
    }

    #[cfg(test)]
    pub fn count_open_sessions(&self, employee_id: &str) -> Result<i64, String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sessions \
                 WHERE employee_id = ?1 AND logout_time IS NULL",
                params![employee_id],
                |row| row.get(0),
            )
            .map_err(|err| format!("Failed to count open sessions: {}", err))
        })
    }
}

fn get_open_session_tx(conn: &Connection, employee_id: &str) -> Result<Option<Session>, String> {
    conn.query_row(
        "SELECT employee_id, tenant_id, employee_name, team, login_time, \
                last_active_time, status, total_break_minutes, \
                current_break_start, logout_time, logout_reason \
         FROM sessions \
         WHERE employee_id = ?1 AND logout_time IS NULL",
        params![employee_id],
        map_session_row,
    )
    .optional()
    .map_err(|err| format!("Failed to query open session: {}", err))
}

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status_raw: String = row.get(6)?;
    let status = PresenceStatus::from_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown status {:?}", status_raw).into(),
        )
    })?;
    Ok(Session {
        employee_id: row.get(0)?,
        tenant_id: row.get(1)?,
        employee_name: row.get(2)?,
        team: row.get(3)?,
        login_time: row.get(4)?,
        last_active_time: row.get(5)?,
        status,
        total_break_minutes: row.get(7)?,
        current_break_start: row.get(8)?,
        logout_time: row.get(9)?,
        logout_reason: row.get(10)?,
    })
}
