//! Client-side activity monitor.
//!
//! Tracks the employee's local interaction stream and decides when to send
//! heartbeats, mark the session idle, resume it, and finally auto-logout.
//! All decisions live in [`MonitorState`], a pure reducer over timestamps;
//! the [`ActivityMonitor`] thread only schedules ticks and executes the
//! actions the reducer emits.
//!
//! There are no timer objects to cancel. Each interaction re-derives the next
//! deadline from scratch, so a stale idle or logout timer cannot fire after
//! activity resumed.

use chrono::{DateTime, Duration, Utc};
use shiftwatch_protocol::{HEARTBEAT_INTERVAL_SECS, IDLE_AFTER_MINUTES, OFFLINE_AFTER_MINUTES};
use std::sync::mpsc;
use std::sync::Arc;

use crate::clock::Clock;

pub const AUTO_LOGOUT_REASON: &str = "Auto Logout due to inactivity";

/// Side effects the reducer asks for, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorAction {
    /// Send a heartbeat so the daemon refreshes `last_active_time`.
    Heartbeat,
    /// The user came back after a local idle notification.
    Resume,
    /// Local inactivity crossed the idle threshold.
    MarkIdle,
    /// Local inactivity crossed the auto-logout threshold. Carries the
    /// logout reason to persist.
    AutoLogout { reason: &'static str },
    /// The monitor is done; the owning loop should stop scheduling ticks.
    Finalize,
}

/// Pure timer state. Thresholds are strict on elapsed seconds, matching how
/// the daemon classifies sessions at read time.
#[derive(Debug, Clone)]
pub struct MonitorState {
    last_interaction: DateTime<Utc>,
    last_heartbeat: Option<DateTime<Utc>>,
    idle_notified: bool,
    finished: bool,
}

impl MonitorState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_interaction: now,
            last_heartbeat: None,
            idle_notified: false,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Records a user interaction. Emits `Resume` when the session was
    /// locally marked idle, otherwise nothing; interactions after auto-logout
    /// are ignored.
    pub fn on_interaction(&mut self, now: DateTime<Utc>) -> Vec<MonitorAction> {
        if self.finished {
            return Vec::new();
        }
        self.last_interaction = now;
        if self.idle_notified {
            self.idle_notified = false;
            vec![MonitorAction::Resume]
        } else {
            Vec::new()
        }
    }

    /// Evaluates all deadlines at `now`. Auto-logout beats the idle
    /// transition when both are due; a heartbeat is only emitted while the
    /// session is still alive.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<MonitorAction> {
        if self.finished {
            return Vec::new();
        }

        let inactive_secs = now
            .signed_duration_since(self.last_interaction)
            .num_seconds();

        if inactive_secs > OFFLINE_AFTER_MINUTES * 60 {
            self.finished = true;
            return vec![
                MonitorAction::AutoLogout {
                    reason: AUTO_LOGOUT_REASON,
                },
                MonitorAction::Finalize,
            ];
        }

        let mut actions = Vec::new();

        if !self.idle_notified && inactive_secs > IDLE_AFTER_MINUTES * 60 {
            self.idle_notified = true;
            actions.push(MonitorAction::MarkIdle);
        }

        // Heartbeats pause while idle-flagged; the daemon derives Idle from
        // the stale last_active_time on its own.
        let heartbeat_due = !self.idle_notified
            && match self.last_heartbeat {
                None => true,
                Some(last) => {
                    now.signed_duration_since(last).num_seconds() >= HEARTBEAT_INTERVAL_SECS as i64
                }
            };
        if heartbeat_due {
            self.last_heartbeat = Some(now);
            actions.push(MonitorAction::Heartbeat);
        }

        actions
    }

    /// The next instant at which `on_tick` could emit something. Recomputed
    /// after every event instead of keeping cancellable timers around.
    pub fn next_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.finished {
            return None;
        }

        let mut deadlines = Vec::with_capacity(3);

        // One second past the threshold, since comparisons are strict.
        if !self.idle_notified {
            deadlines
                .push(self.last_interaction + Duration::seconds(IDLE_AFTER_MINUTES * 60 + 1));
        }
        deadlines.push(self.last_interaction + Duration::seconds(OFFLINE_AFTER_MINUTES * 60 + 1));

        if !self.idle_notified {
            let heartbeat_at = match self.last_heartbeat {
                None => now,
                Some(last) => last + Duration::seconds(HEARTBEAT_INTERVAL_SECS as i64),
            };
            deadlines.push(heartbeat_at);
        }

        deadlines.into_iter().min().map(|deadline| deadline.max(now))
    }
}

/// Daemon calls the monitor thread performs. Implemented over the real
/// client by the agent; tests substitute a recorder.
pub trait MonitorOps: Send {
    fn heartbeat(&mut self);
    fn mark_idle(&mut self);
    fn resume(&mut self);
    fn auto_logout(&mut self, reason: &str);
}

enum MonitorEvent {
    Interaction,
    Shutdown,
}

/// Owns the timer thread. Interactions arrive through [`interaction`]; the
/// thread wakes at the reducer's next deadline and executes its actions.
pub struct ActivityMonitor {
    sender: mpsc::Sender<MonitorEvent>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ActivityMonitor {
    pub fn spawn<O: MonitorOps + 'static>(clock: Arc<dyn Clock>, mut ops: O) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut state = MonitorState::new(clock.now());
            run_actions(&mut ops, state.on_tick(clock.now()));

            loop {
                let now = clock.now();
                let Some(deadline) = state.next_deadline(now) else {
                    break;
                };
                let wait = (deadline - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                match receiver.recv_timeout(wait) {
                    Ok(MonitorEvent::Interaction) => {
                        run_actions(&mut ops, state.on_interaction(clock.now()));
                    }
                    Ok(MonitorEvent::Shutdown) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        run_actions(&mut ops, state.on_tick(clock.now()));
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
                if state.is_finished() {
                    break;
                }
            }
        });
        Self {
            sender,
            handle: Some(handle),
        }
    }

    /// Reports a user interaction (pointer, key, scroll, touch).
    pub fn interaction(&self) {
        let _ = self.sender.send(MonitorEvent::Interaction);
    }

    pub fn shutdown(mut self) {
        let _ = self.sender.send(MonitorEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        let _ = self.sender.send(MonitorEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_actions<O: MonitorOps>(ops: &mut O, actions: Vec<MonitorAction>) {
    for action in actions {
        match action {
            MonitorAction::Heartbeat => ops.heartbeat(),
            MonitorAction::Resume => ops.resume(),
            MonitorAction::MarkIdle => ops.mark_idle(),
            MonitorAction::AutoLogout { reason } => ops.auto_logout(reason),
            MonitorAction::Finalize => {}
        }
    }
}
