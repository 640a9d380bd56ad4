//! IPC protocol types and validation for shiftwatch-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema
//! drift. The daemon remains the authority on validation, but clients can
//! reuse the same types to construct valid requests. Presence classification
//! rules live here too (see [`session`]), so every consumer derives status
//! from one set of thresholds.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod session;

pub use session::{
    derive_presence, parse_rfc3339, DerivedPresence, PresenceStatus, RosterEvent, Session,
    HEARTBEAT_INTERVAL_SECS, IDLE_AFTER_MINUTES, OFFLINE_AFTER_MINUTES,
};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const DEFAULT_ROSTER_PAGE_SIZE: usize = 100;
pub const MAX_ROSTER_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Heartbeat,
    MarkIdle,
    Resume,
    StartBreak,
    EndBreak,
    Logout,
    GetRoster,
    Subscribe,
    GetOfficeHours,
    SaveOfficeHours,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Parameters for `heartbeat`. The tenant id is required because a heartbeat
/// may have to self-heal a missing session, and a created row must land in
/// the right tenant partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatParams {
    pub employee_id: String,
    pub tenant_id: String,
}

/// Parameters for operations scoped to one employee's open session
/// (`mark_idle`, `resume`, `start_break`, `end_break`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmployeeParams {
    pub employee_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogoutParams {
    pub employee_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterParams {
    pub tenant_id: String,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Parameters for tenant-scoped reads (`subscribe`, `get_office_hours`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantParams {
    pub tenant_id: String,
}

/// Per-tenant office hours, display-only configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfficeHours {
    pub tenant_id: String,
    /// "HH:MM", 24-hour clock.
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
    /// Weekday ordinals, Monday = 0 through Sunday = 6.
    pub working_days: Vec<u8>,
}

fn default_page_size() -> usize {
    DEFAULT_ROSTER_PAGE_SIZE
}

pub fn parse_heartbeat(params: Value) -> Result<HeartbeatParams, ErrorInfo> {
    let parsed: HeartbeatParams = from_value(params)?;
    require_id(&parsed.employee_id, "employee_id")?;
    require_id(&parsed.tenant_id, "tenant_id")?;
    Ok(parsed)
}

pub fn parse_employee(params: Value) -> Result<EmployeeParams, ErrorInfo> {
    let parsed: EmployeeParams = from_value(params)?;
    require_id(&parsed.employee_id, "employee_id")?;
    Ok(parsed)
}

pub fn parse_logout(params: Value) -> Result<LogoutParams, ErrorInfo> {
    let parsed: LogoutParams = from_value(params)?;
    require_id(&parsed.employee_id, "employee_id")?;
    if let Some(reason) = &parsed.reason {
        if reason.len() > 512 {
            return Err(ErrorInfo::new(
                "invalid_params",
                "reason must be 512 characters or fewer",
            ));
        }
    }
    Ok(parsed)
}

pub fn parse_roster(params: Value) -> Result<RosterParams, ErrorInfo> {
    let mut parsed: RosterParams = from_value(params)?;
    require_id(&parsed.tenant_id, "tenant_id")?;
    if parsed.page_size == 0 {
        return Err(ErrorInfo::new("invalid_params", "page_size must be > 0"));
    }
    parsed.page_size = parsed.page_size.min(MAX_ROSTER_PAGE_SIZE);
    Ok(parsed)
}

pub fn parse_tenant(params: Value) -> Result<TenantParams, ErrorInfo> {
    let parsed: TenantParams = from_value(params)?;
    require_id(&parsed.tenant_id, "tenant_id")?;
    Ok(parsed)
}

pub fn parse_office_hours(params: Value) -> Result<OfficeHours, ErrorInfo> {
    let parsed: OfficeHours = from_value(params)?;
    parsed.validate()?;
    Ok(parsed)
}

impl OfficeHours {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.tenant_id, "tenant_id")?;
        require_clock_time(&self.start_time, "start_time")?;
        require_clock_time(&self.end_time, "end_time")?;
        if self.timezone.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "timezone is required"));
        }
        if self.working_days.is_empty() {
            return Err(ErrorInfo::new(
                "invalid_params",
                "working_days must not be empty",
            ));
        }
        if self.working_days.iter().any(|day| *day > 6) {
            return Err(ErrorInfo::new(
                "invalid_params",
                "working_days ordinals must be 0..=6",
            ));
        }
        Ok(())
    }
}

fn from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ErrorInfo> {
    serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("invalid params: {}", err)))
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > 128 {
        return Err(ErrorInfo::new(
            "invalid_params",
            format!("{} must be 128 characters or fewer", field),
        ));
    }
    Ok(())
}

fn require_clock_time(value: &str, field: &str) -> Result<(), ErrorInfo> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} must be HH:MM (24-hour)", field),
        )
    })?;
    Ok(())
}
