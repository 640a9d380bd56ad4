//! Error types for shiftwatch-core operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PresenceError>;

#[derive(Debug, Error)]
pub enum PresenceError {
    /// A break or explicit-status operation was attempted with no open
    /// session. Non-fatal; callers show a warning and leave local state
    /// unchanged.
    #[error("no open session for employee {employee_id}")]
    NoActiveSession { employee_id: String },

    /// The daemon or its store could not be reached. Surfaced to the
    /// caller, never retried automatically.
    #[error("presence daemon unavailable: {0}")]
    Unavailable(String),

    /// The daemon answered with an error response.
    #[error("daemon error: {code}: {message}")]
    Daemon { code: String, message: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV export failed: {0}")]
    Export(String),
}

impl PresenceError {
    /// Maps a wire error to the client taxonomy. `no_active_session` keeps
    /// its identity so the UI can render it as a warning rather than a
    /// failure.
    pub fn from_wire(code: &str, message: &str, employee_id: &str) -> Self {
        match code {
            "no_active_session" => PresenceError::NoActiveSession {
                employee_id: employee_id.to_string(),
            },
            "store_unavailable" => PresenceError::Unavailable(message.to_string()),
            _ => PresenceError::Daemon {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_mapping_preserves_no_active_session() {
        let err = PresenceError::from_wire("no_active_session", "no open session", "emp-1");
        assert!(matches!(
            err,
            PresenceError::NoActiveSession { employee_id } if employee_id == "emp-1"
        ));
    }

    #[test]
    fn wire_mapping_marks_store_failures_unavailable() {
        let err = PresenceError::from_wire("store_unavailable", "disk gone", "emp-1");
        assert!(matches!(err, PresenceError::Unavailable(_)));
    }

    #[test]
    fn unknown_codes_stay_daemon_errors() {
        let err = PresenceError::from_wire("protocol_mismatch", "bad version", "emp-1");
        assert!(matches!(err, PresenceError::Daemon { code, .. } if code == "protocol_mismatch"));
    }
}
