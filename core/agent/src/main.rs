//! shiftwatch-agent: workstation agent for Shiftwatch presence tracking.
//!
//! Reads interaction events from stdin (one kind per line: `pointer`, `key`,
//! `scroll`, `touch`) and drives the activity monitor against the local
//! presence daemon. Runs until EOF, a `quit` line, or auto-logout.

mod config;

use clap::Parser;
use shiftwatch_core::{
    ActivityMonitor, Clock, DaemonClient, InactivityWatchdog, MonitorOps, PresenceError,
    SystemClock,
};
use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shiftwatch-agent")]
#[command(about = "Shiftwatch workstation presence agent")]
#[command(version)]
struct Cli {
    /// Employee id; overrides the config file.
    #[arg(long)]
    employee_id: Option<String>,

    /// Tenant id; overrides the config file.
    #[arg(long)]
    tenant_id: Option<String>,

    /// Path to the agent config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Daemon calls the monitor thread makes on our behalf.
struct DaemonOps {
    client: DaemonClient,
    employee_id: String,
    tenant_id: String,
    logged_out: Arc<AtomicBool>,
}

impl MonitorOps for DaemonOps {
    fn heartbeat(&mut self) {
        self.client.heartbeat(&self.employee_id, &self.tenant_id);
    }

    fn mark_idle(&mut self) {
        match self.client.mark_idle(&self.employee_id) {
            Ok(_) => info!(employee_id = %self.employee_id, "Session marked idle"),
            Err(PresenceError::NoActiveSession { .. }) => {
                warn!(employee_id = %self.employee_id, "Idle transition had no open session");
            }
            Err(err) => warn!(error = %err, "Failed to mark session idle"),
        }
    }

    fn resume(&mut self) {
        match self.client.resume(&self.employee_id) {
            Ok(_) => info!(employee_id = %self.employee_id, "Session resumed"),
            Err(PresenceError::NoActiveSession { .. }) => {
                warn!(employee_id = %self.employee_id, "Resume had no open session");
            }
            Err(err) => warn!(error = %err, "Failed to resume session"),
        }
    }

    fn auto_logout(&mut self, reason: &str) {
        // The monitor stops regardless of delivery outcome; logout is
        // idempotent, so a retry on the next launch is harmless.
        match self.client.logout(&self.employee_id, Some(reason)) {
            Ok(closed) => {
                info!(employee_id = %self.employee_id, closed, reason, "Auto logout");
            }
            Err(err) => warn!(error = %err, "Auto logout not delivered"),
        }
        self.logged_out.store(true, Ordering::SeqCst);
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = match config::load_config(cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Agent config unusable");
            std::process::exit(1);
        }
    };

    if let Some(socket) = &config.socket_path {
        env::set_var("SHIFTWATCH_DAEMON_SOCKET", socket);
    }

    let Some(employee_id) = cli.employee_id.or(config.employee_id) else {
        error!("employee_id is required (flag or config file)");
        std::process::exit(1);
    };
    let Some(tenant_id) = cli.tenant_id.or(config.tenant_id) else {
        error!("tenant_id is required (flag or config file)");
        std::process::exit(1);
    };

    info!(%employee_id, %tenant_id, "Agent starting");

    let clock = Arc::new(SystemClock);
    let logged_out = Arc::new(AtomicBool::new(false));
    let ops = DaemonOps {
        client: DaemonClient::new(),
        employee_id: employee_id.clone(),
        tenant_id,
        logged_out: logged_out.clone(),
    };
    let monitor = ActivityMonitor::spawn(clock.clone(), ops);
    let mut watchdog = InactivityWatchdog::new(clock.now());

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Failed to read interaction line");
                break;
            }
        };

        if logged_out.load(Ordering::SeqCst) {
            info!("Session auto-logged out; agent stopping");
            break;
        }

        let now = clock.now();
        if watchdog.exceeded(now) {
            // Independent of the monitor's own auto-logout; idempotent.
            let client = DaemonClient::new();
            match client.logout(&employee_id, Some(shiftwatch_core::AUTO_LOGOUT_REASON)) {
                Ok(closed) => info!(closed, "Watchdog logout"),
                Err(err) => warn!(error = %err, "Watchdog logout not delivered"),
            }
            break;
        }

        match line.trim() {
            "" => {}
            "quit" => {
                info!("Quit requested");
                break;
            }
            "pointer" | "key" | "scroll" | "touch" => {
                watchdog.touch(now);
                monitor.interaction();
            }
            other => {
                debug!(kind = other, "Ignoring unknown interaction kind");
            }
        }
    }

    monitor.shutdown();
    info!("Agent stopped");
}

fn init_logging() {
    let debug_enabled = env::var("SHIFTWATCH_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
