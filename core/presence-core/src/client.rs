//! Client for the presence daemon socket.
//!
//! The daemon is the only writer. Mutating calls surface failures to the
//! caller, except heartbeats: a missed heartbeat is logged and swallowed so a
//! transient daemon restart never interrupts the agent loop.

use chrono::Utc;
use serde_json::{json, Value};
use shiftwatch_protocol::{
    Method, OfficeHours, Request, Response, RosterEvent, Session, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use crate::error::{PresenceError, Result};

const SOCKET_ENV: &str = "SHIFTWATCH_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;

/// One page of the tenant roster.
#[derive(Debug, Clone)]
pub struct RosterPage {
    pub sessions: Vec<Session>,
    pub has_more: bool,
}

/// Result of an `end_break` call. The daemon tolerates ending a break that
/// was never started; the caller may want to tell the user.
#[derive(Debug, Clone)]
pub struct BreakEnd {
    pub closed_break: bool,
    pub session: Session,
}

#[derive(Debug, Clone, Default)]
pub struct DaemonClient;

impl DaemonClient {
    pub fn new() -> Self {
        Self
    }

    /// Sends a heartbeat. Errors are logged and swallowed; returns whether
    /// the daemon confirmed it.
    pub fn heartbeat(&self, employee_id: &str, tenant_id: &str) -> bool {
        let request = self.request(
            Method::Heartbeat,
            json!({"employee_id": employee_id, "tenant_id": tenant_id}),
        );
        match self.call(request, employee_id) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %err, employee_id, "Heartbeat not delivered");
                false
            }
        }
    }

    pub fn mark_idle(&self, employee_id: &str) -> Result<Session> {
        self.session_call(Method::MarkIdle, employee_id)
    }

    pub fn resume(&self, employee_id: &str) -> Result<Session> {
        self.session_call(Method::Resume, employee_id)
    }

    pub fn start_break(&self, employee_id: &str) -> Result<Session> {
        self.session_call(Method::StartBreak, employee_id)
    }

    pub fn end_break(&self, employee_id: &str) -> Result<BreakEnd> {
        let request = self.request(Method::EndBreak, json!({"employee_id": employee_id}));
        let data = self.call(request, employee_id)?;
        let closed_break = data
            .get("closed_break")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let session = extract_session(&data)?;
        Ok(BreakEnd {
            closed_break,
            session,
        })
    }

    /// Closes the open session if there is one. Idempotent; returns whether a
    /// row was actually closed.
    pub fn logout(&self, employee_id: &str, reason: Option<&str>) -> Result<bool> {
        let request = self.request(
            Method::Logout,
            json!({"employee_id": employee_id, "reason": reason}),
        );
        let data = self.call(request, employee_id)?;
        Ok(data.get("closed").and_then(Value::as_bool).unwrap_or(false))
    }

    pub fn get_roster(&self, tenant_id: &str, page: usize, page_size: usize) -> Result<RosterPage> {
        let request = self.request(
            Method::GetRoster,
            json!({"tenant_id": tenant_id, "page": page, "page_size": page_size}),
        );
        let data = self.call(request, "")?;
        let sessions = data
            .get("sessions")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| PresenceError::Json {
                context: "roster sessions".to_string(),
                source: err,
            })?
            .unwrap_or_default();
        let has_more = data
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(RosterPage { sessions, has_more })
    }

    pub fn get_office_hours(&self, tenant_id: &str) -> Result<Option<OfficeHours>> {
        let request = self.request(Method::GetOfficeHours, json!({"tenant_id": tenant_id}));
        let data = self.call(request, "")?;
        let hours = data.get("office_hours").cloned().unwrap_or(Value::Null);
        if hours.is_null() {
            return Ok(None);
        }
        serde_json::from_value(hours)
            .map(Some)
            .map_err(|err| PresenceError::Json {
                context: "office hours".to_string(),
                source: err,
            })
    }

    pub fn save_office_hours(&self, hours: &OfficeHours) -> Result<()> {
        let params = serde_json::to_value(hours).map_err(|err| PresenceError::Json {
            context: "office hours params".to_string(),
            source: err,
        })?;
        let request = self.request(Method::SaveOfficeHours, params);
        self.call(request, "")?;
        Ok(())
    }

    /// Opens a long-lived subscription for one tenant's roster changes.
    ///
    /// A reader thread owns the stream and forwards events through the
    /// returned receiver. Dropping the [`Subscription`] shuts the socket
    /// down, which ends the thread.
    pub fn subscribe(&self, tenant_id: &str) -> Result<(Subscription, mpsc::Receiver<RosterEvent>)> {
        let socket = socket_path()?;
        let mut stream = UnixStream::connect(&socket).map_err(|err| {
            PresenceError::Unavailable(format!("connect to daemon socket: {}", err))
        })?;
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        let request = self.request(Method::Subscribe, json!({"tenant_id": tenant_id}));
        write_request(&mut stream, &request)?;

        // One buffered reader for the whole stream, so bytes that arrive
        // right behind the ack are not lost to a raw read.
        let reader_stream = stream.try_clone().map_err(|err| PresenceError::Io {
            context: "clone subscription stream".to_string(),
            source: err,
        })?;
        let mut reader = BufReader::new(reader_stream);

        // The daemon acknowledges before it starts streaming.
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let mut ack_line = String::new();
        reader
            .read_line(&mut ack_line)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::WouldBlock => {
                    PresenceError::Unavailable("timed out waiting for subscribe ack".to_string())
                }
                _ => PresenceError::Io {
                    context: "read subscribe ack".to_string(),
                    source: err,
                },
            })?;
        let ack: Response =
            serde_json::from_str(ack_line.trim_end()).map_err(|err| PresenceError::Json {
                context: "parse subscribe ack".to_string(),
                source: err,
            })?;
        if !ack.ok {
            let error = ack
                .error
                .unwrap_or_else(|| shiftwatch_protocol::ErrorInfo::new("unknown", "no error info"));
            return Err(PresenceError::from_wire(&error.code, &error.message, ""));
        }

        // The stream stays open indefinitely from here on.
        let _ = stream.set_read_timeout(None);

        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RosterEvent>(&line) {
                    Ok(event) => {
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Dropping malformed roster event");
                    }
                }
            }
        });

        Ok((
            Subscription {
                stream,
                handle: Some(handle),
            },
            receiver,
        ))
    }

    fn session_call(&self, method: Method, employee_id: &str) -> Result<Session> {
        let request = self.request(method, json!({"employee_id": employee_id}));
        let data = self.call(request, employee_id)?;
        extract_session(&data)
    }

    fn request(&self, method: Method, params: Value) -> Request {
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some(make_request_id()),
            params: Some(params),
        }
    }

    fn call(&self, request: Request, employee_id: &str) -> Result<Value> {
        let response = send_request(request)?;
        if response.ok {
            return Ok(response.data.unwrap_or(Value::Null));
        }
        let error = response
            .error
            .unwrap_or_else(|| shiftwatch_protocol::ErrorInfo::new("unknown", "no error info"));
        Err(PresenceError::from_wire(
            &error.code,
            &error.message,
            employee_id,
        ))
    }
}

/// Handle for an open roster subscription.
pub struct Subscription {
    stream: UnixStream,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn socket_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| PresenceError::Unavailable("home directory not found".to_string()))?;
    Ok(home.join(".shiftwatch").join(SOCKET_NAME))
}

fn send_request(request: Request) -> Result<Response> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| PresenceError::Unavailable(format!("connect to daemon socket: {}", err)))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    write_request(&mut stream, &request)?;
    read_response(&mut stream)
}

fn write_request(stream: &mut UnixStream, request: &Request) -> Result<()> {
    serde_json::to_writer(&mut *stream, request).map_err(|err| PresenceError::Json {
        context: "write request".to_string(),
        source: err,
    })?;
    stream.write_all(b"\n").map_err(|err| PresenceError::Io {
        context: "flush request".to_string(),
        source: err,
    })?;
    stream.flush().ok();
    Ok(())
}

fn read_response(stream: &mut UnixStream) -> Result<Response> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(PresenceError::Unavailable(
                        "response exceeded maximum size".to_string(),
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(PresenceError::Unavailable(
                    "timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => {
                return Err(PresenceError::Io {
                    context: "read response".to_string(),
                    source: err,
                })
            }
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(PresenceError::Unavailable(
            "daemon response was empty".to_string(),
        ));
    }

    serde_json::from_slice(response_bytes).map_err(|err| PresenceError::Json {
        context: "parse response".to_string(),
        source: err,
    })
}

fn extract_session(data: &Value) -> Result<Session> {
    let session = data
        .get("session")
        .cloned()
        .ok_or_else(|| PresenceError::Daemon {
            code: "missing_field".to_string(),
            message: "response carried no session".to_string(),
        })?;
    serde_json::from_value(session).map_err(|err| PresenceError::Json {
        context: "response session".to_string(),
        source: err,
    })
}

fn make_request_id() -> String {
    format!(
        "req-{}-{}",
        Utc::now().timestamp_millis(),
        std::process::id()
    )
}
