//! Session-layer inactivity watchdog.
//!
//! A flat absolute budget over any interaction kind, kept separate from the
//! activity monitor's timer cascade. Both may decide to log out; that is
//! fine because logout is idempotent.

use chrono::{DateTime, Utc};
use shiftwatch_protocol::OFFLINE_AFTER_MINUTES;

#[derive(Debug, Clone)]
pub struct InactivityWatchdog {
    last_interaction: DateTime<Utc>,
    budget_secs: i64,
}

impl InactivityWatchdog {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_interaction: now,
            budget_secs: OFFLINE_AFTER_MINUTES * 60,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_interaction = now;
    }

    /// True once the inactivity budget is spent. Strict comparison, matching
    /// the presence state machine.
    pub fn exceeded(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_interaction)
            .num_seconds()
            > self.budget_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn start() -> DateTime<Utc> {
        "2026-08-26T10:00:00Z".parse().expect("start")
    }

    #[test]
    fn budget_is_strict_at_five_minutes() {
        let watchdog = InactivityWatchdog::new(start());
        assert!(!watchdog.exceeded(start() + Duration::seconds(5 * 60)));
        assert!(watchdog.exceeded(start() + Duration::seconds(5 * 60 + 1)));
    }

    #[test]
    fn touch_resets_the_budget() {
        let mut watchdog = InactivityWatchdog::new(start());
        watchdog.touch(start() + Duration::minutes(4));
        assert!(!watchdog.exceeded(start() + Duration::minutes(8)));
        assert!(watchdog.exceeded(start() + Duration::minutes(10)));
    }
}
