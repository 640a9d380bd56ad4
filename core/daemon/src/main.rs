//! Shiftwatch daemon entrypoint.
//!
//! A small, single-writer service that owns the presence session store:
//! a socket listener, strict request validation, a SQLite-backed session
//! table, and tenant-scoped push streaming for roster subscribers. There is
//! deliberately no background sweeper; abandoned sessions are classified
//! Offline at read time from `last_active_time`.

use chrono::Utc;
use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde_json::json;
use shiftwatch_protocol::{
    parse_employee, parse_heartbeat, parse_logout, parse_office_hours, parse_roster,
    parse_tenant, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod push;
mod state;
mod store;

use state::{EndBreakOutcome, SharedState};
use store::Store;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const SUBSCRIBE_POLL_INTERVAL_SECS: u64 = 1;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    if let Some(parent) = db_path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            error!(error = %err, "Failed to prepare daemon database directory");
            std::process::exit(1);
        }
    }

    let store = match Store::new(db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize presence store");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Shiftwatch daemon started");

    let shared_state = Arc::new(SharedState::new(store));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
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

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var("SHIFTWATCH_DAEMON_SOCKET") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".shiftwatch").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var("SHIFTWATCH_DAEMON_DB") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".shiftwatch").join("daemon").join("presence.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");

    if request.method == Method::Subscribe {
        handle_subscribe(stream, request, state);
        return;
    }

    let response = handle_request(request, state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: Arc<SharedState>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let params = request.params;
    let now = Utc::now();

    match request.method {
        Method::GetHealth => Response::ok(
            id,
            json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            }),
        ),
        Method::Heartbeat => {
            let parsed = match params.ok_or_missing().and_then(parse_heartbeat) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.heartbeat(&parsed.employee_id, &parsed.tenant_id, now) {
                Ok(outcome) => match serde_json::to_value(&outcome.session) {
                    Ok(session) => {
                        Response::ok(id, json!({"healed": outcome.healed, "session": session}))
                    }
                    Err(err) => serialization_error(id, err),
                },
                Err(err) => Response::error(id, "store_unavailable", err),
            }
        }
        Method::MarkIdle => {
            let parsed = match params.ok_or_missing().and_then(parse_employee) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            session_response(id, state.mark_idle(&parsed.employee_id, now), &parsed.employee_id)
        }
        Method::Resume => {
            let parsed = match params.ok_or_missing().and_then(parse_employee) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            session_response(id, state.resume(&parsed.employee_id, now), &parsed.employee_id)
        }
        Method::StartBreak => {
            let parsed = match params.ok_or_missing().and_then(parse_employee) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            session_response(
                id,
                state.start_break(&parsed.employee_id, now),
                &parsed.employee_id,
            )
        }
        Method::EndBreak => {
            let parsed = match params.ok_or_missing().and_then(parse_employee) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.end_break(&parsed.employee_id, now) {
                Ok(Some(EndBreakOutcome::Closed(session))) => {
                    match serde_json::to_value(&session) {
                        Ok(session) => {
                            Response::ok(id, json!({"closed_break": true, "session": session}))
                        }
                        Err(err) => serialization_error(id, err),
                    }
                }
                Ok(Some(EndBreakOutcome::NoOpenBreak(session))) => {
                    match serde_json::to_value(&session) {
                        Ok(session) => {
                            Response::ok(id, json!({"closed_break": false, "session": session}))
                        }
                        Err(err) => serialization_error(id, err),
                    }
                }
                Ok(None) => no_active_session(id, &parsed.employee_id),
                Err(err) => Response::error(id, "store_unavailable", err),
            }
        }
        Method::Logout => {
            let parsed = match params.ok_or_missing().and_then(parse_logout) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.logout(&parsed.employee_id, parsed.reason.as_deref(), now) {
                Ok(closed) => Response::ok(id, json!({"closed": closed})),
                Err(err) => Response::error(id, "store_unavailable", err),
            }
        }
        Method::GetRoster => {
            let parsed = match params.ok_or_missing().and_then(parse_roster) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.roster_page(&parsed.tenant_id, parsed.page, parsed.page_size) {
                Ok((sessions, has_more)) => match serde_json::to_value(&sessions) {
                    Ok(sessions) => {
                        Response::ok(id, json!({"sessions": sessions, "has_more": has_more}))
                    }
                    Err(err) => serialization_error(id, err),
                },
                Err(err) => Response::error(id, "store_unavailable", err),
            }
        }
        Method::GetOfficeHours => {
            let parsed = match params.ok_or_missing().and_then(parse_tenant) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.office_hours(&parsed.tenant_id) {
                Ok(hours) => match serde_json::to_value(&hours) {
                    Ok(hours) => Response::ok(id, json!({"office_hours": hours})),
                    Err(err) => serialization_error(id, err),
                },
                Err(err) => Response::error(id, "store_unavailable", err),
            }
        }
        Method::SaveOfficeHours => {
            let parsed = match params.ok_or_missing().and_then(parse_office_hours) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.save_office_hours(&parsed) {
                Ok(()) => Response::ok(id, json!({"saved": true})),
                Err(err) => Response::error(id, "store_unavailable", err),
            }
        }
        Method::Subscribe => {
            // Handled before dispatch; reaching here is a framing bug.
            Response::error(id, "invalid_params", "subscribe requires a streaming connection")
        }
    }
}

fn handle_subscribe(mut stream: UnixStream, request: Request, state: Arc<SharedState>) {
    if request.protocol_version != PROTOCOL_VERSION {
        let response = Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
        let _ = write_response(&mut stream, response);
        return;
    }

    let parsed = match request.params.ok_or_missing().and_then(parse_tenant) {
        Ok(parsed) => parsed,
        Err(err) => {
            let _ = write_response(&mut stream, Response::error_with_info(request.id, err));
            return;
        }
    };

    let (subscriber_id, receiver) = state.subscribe(&parsed.tenant_id);
    let ack = Response::ok(request.id, json!({"subscribed": true}));
    if write_response(&mut stream, ack).is_err() {
        state.unsubscribe(subscriber_id);
        return;
    }

    info!(
        subscriber_id,
        tenant_id = %parsed.tenant_id,
        "Roster subscription started"
    );

    loop {
        match receiver.recv_timeout(Duration::from_secs(SUBSCRIBE_POLL_INTERVAL_SECS)) {
            Ok(event) => {
                let Ok(payload) = serde_json::to_vec(&event) else {
                    continue;
                };
                if stream.write_all(&payload).is_err()
                    || stream.write_all(b"\n").is_err()
                    || stream.flush().is_err()
                {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Blank-line keepalive; readers skip it. Detects peers that
                // went away without closing the socket.
                if stream.write_all(b"\n").is_err() || stream.flush().is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    state.unsubscribe(subscriber_id);
    tracing::debug!(subscriber_id, "Roster subscription ended");
}

fn session_response(
    id: Option<String>,
    result: Result<Option<shiftwatch_protocol::Session>, String>,
    employee_id: &str,
) -> Response {
    match result {
        Ok(Some(session)) => match serde_json::to_value(&session) {
            Ok(session) => Response::ok(id, json!({"session": session})),
            Err(err) => serialization_error(id, err),
        },
        Ok(None) => no_active_session(id, employee_id),
        Err(err) => Response::error(id, "store_unavailable", err),
    }
}

fn no_active_session(id: Option<String>, employee_id: &str) -> Response {
    Response::error(
        id,
        "no_active_session",
        format!("no open session for employee {}", employee_id),
    )
}

fn serialization_error(id: Option<String>, err: serde_json::Error) -> Response {
    Response::error(
        id,
        "serialization_error",
        format!("Failed to serialize response: {}", err),
    )
}

trait OkOrMissing {
    fn ok_or_missing(self) -> Result<serde_json::Value, ErrorInfo>;
}

impl OkOrMissing for Option<serde_json::Value> {
    fn ok_or_missing(self) -> Result<serde_json::Value, ErrorInfo> {
        self.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
