//! CSV export of the roster view.
//!
//! A pure projection of already-derived rows; whatever filter the roster has
//! applied is what ends up in the file.

use std::io::Write;

use crate::error::{PresenceError, Result};
use crate::roster::DisplayRow;

const HEADERS: [&str; 7] = [
    "employee_id",
    "name",
    "team",
    "status",
    "idle_minutes",
    "break_minutes",
    "productive_minutes",
];

/// Writes the given rows as CSV, header first.
pub fn write_roster_csv<W: Write>(writer: W, rows: &[DisplayRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(HEADERS)
        .map_err(|err| PresenceError::Export(err.to_string()))?;

    for row in rows {
        csv.write_record([
            row.session.employee_id.as_str(),
            row.session.employee_name.as_deref().unwrap_or("N/A"),
            row.session.team.as_deref().unwrap_or("N/A"),
            row.derived.status.as_str(),
            &row.derived.idle_minutes.to_string(),
            &row.derived.break_minutes.to_string(),
            &row.derived.productive_minutes.to_string(),
        ])
        .map_err(|err| PresenceError::Export(err.to_string()))?;
    }

    csv.flush()
        .map_err(|err| PresenceError::Export(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftwatch_protocol::{DerivedPresence, PresenceStatus, Session};

    fn row(employee_id: &str, name: Option<&str>, status: PresenceStatus) -> DisplayRow {
        DisplayRow {
            session: Session {
                employee_id: employee_id.to_string(),
                tenant_id: "tenant-1".to_string(),
                employee_name: name.map(str::to_string),
                team: Some("Collections".to_string()),
                login_time: "2026-08-26T08:00:00+00:00".to_string(),
                last_active_time: "2026-08-26T08:30:00+00:00".to_string(),
                status,
                total_break_minutes: 0,
                current_break_start: None,
                logout_time: None,
                logout_reason: None,
            },
            derived: DerivedPresence {
                status,
                idle_minutes: if status == PresenceStatus::Idle { 4 } else { 0 },
                break_minutes: 12,
                productive_minutes: 95,
            },
        }
    }

    #[test]
    fn export_projects_derived_rows() {
        let rows = vec![
            row("emp-1", Some("Dana"), PresenceStatus::Online),
            row("emp-2", None, PresenceStatus::Idle),
        ];

        let mut buffer = Vec::new();
        write_roster_csv(&mut buffer, &rows).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "employee_id,name,team,status,idle_minutes,break_minutes,productive_minutes"
        );
        assert_eq!(lines[1], "emp-1,Dana,Collections,online,0,12,95");
        assert_eq!(lines[2], "emp-2,N/A,Collections,idle,4,12,95");
    }

    #[test]
    fn empty_roster_exports_header_only() {
        let mut buffer = Vec::new();
        write_roster_csv(&mut buffer, &[]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
