//! Display formatting for durations and timestamps.

use chrono::{DateTime, Utc};

/// Formats a whole-minute duration as "2h 05m", or "45m" under an hour.
pub fn format_minutes(minutes: i64) -> String {
    let minutes = minutes.max(0);
    let hours = minutes / 60;
    let rem = minutes % 60;
    if hours > 0 {
        format!("{}h {:02}m", hours, rem)
    } else {
        format!("{}m", rem)
    }
}

/// Formats how long ago `instant` was relative to `now`, coarsest unit only.
pub fn format_relative(instant: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(instant).num_seconds().max(0);
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86400)
    }
}

/// Human-readable weekday names for office-hours ordinals (Monday = 0).
pub fn format_working_days(days: &[u8]) -> String {
    const NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    let mut names: Vec<&str> = days
        .iter()
        .filter_map(|day| NAMES.get(*day as usize).copied())
        .collect();
    names.dedup();
    names.join(", ")
}
