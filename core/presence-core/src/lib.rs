//! # shiftwatch-core
//!
//! Client-side presence logic for Shiftwatch, shared by the agent binary and
//! any dashboard front end.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Worker threads and mpsc
//!   channels cover the timer and subscription loops.
//! - **Deterministic time**: Everything time-dependent takes a [`Clock`] or
//!   an explicit `now`, so the state machines are testable without sleeping.
//! - **Graceful degradation**: A row that cannot be classified renders as
//!   Offline instead of failing the roster; a missed heartbeat is logged and
//!   retried on the next tick.
//! - **Daemon is the writer**: All session mutations go through the daemon
//!   socket; this crate never touches the store directly.

pub mod cache;
pub mod client;
pub mod clock;
pub mod error;
pub mod export;
pub mod hours;
pub mod monitor;
pub mod roster;
pub mod timefmt;
pub mod watchdog;

pub use cache::TtlCache;
pub use client::{BreakEnd, DaemonClient, RosterPage, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PresenceError, Result};
pub use export::write_roster_csv;
pub use hours::{format_office_hours, HoursSource, OfficeHoursView};
pub use monitor::{ActivityMonitor, MonitorAction, MonitorOps, MonitorState, AUTO_LOGOUT_REASON};
pub use roster::{DisplayRow, Roster, RosterSource};
pub use watchdog::InactivityWatchdog;
