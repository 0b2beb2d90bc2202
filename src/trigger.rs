//! Trigger server - manual commands over plain HTTP
//!
//! `GET /<command>` enqueues the command on the gateway and answers with the
//! request id. `GET /bounds?max=..` and `GET /window?size=..` adjust the
//! running session. The server keeps no state of its own.

use crate::gateway::CommandGateway;
use crate::session::BoundsHandle;
use anyhow::Context;
use gesture_flight_shared::{Bounds, CommandKind, ControlError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Longest request head we are willing to read
const MAX_HEAD_BYTES: u64 = 8 * 1024;

/// Status line and plain-text body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            503 => "Service Unavailable",
            _ => "Error",
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// What the trigger server is allowed to touch
#[derive(Debug, Clone)]
pub struct Controls {
    pub gateway: CommandGateway,
    pub bounds: BoundsHandle,
    pub window: Arc<watch::Sender<usize>>,
}

/// Map a request path to a command
pub fn route(path: &str) -> Option<CommandKind> {
    let path = path.split('?').next().unwrap_or(path);
    CommandKind::from_name(path.strip_prefix('/')?)
}

fn query_pairs(path: &str) -> impl Iterator<Item = (&str, &str)> {
    path.split_once('?')
        .map(|(_, query)| query)
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
}

/// Merge query values into the current bounds
fn parse_bounds(current: Bounds, path: &str) -> Result<Bounds, String> {
    let mut bounds = current;
    for (key, value) in query_pairs(path) {
        let slot = match key {
            "min" => &mut bounds.min,
            "max" => &mut bounds.max,
            "vertical_step" => &mut bounds.vertical_step,
            "horizontal_step" => &mut bounds.horizontal_step,
            _ => return Err(format!("Unknown bound '{}'", key)),
        };
        *slot = value
            .parse()
            .map_err(|_| format!("Invalid {} '{}'", key, value))?;
    }
    Ok(bounds)
}

fn parse_window(path: &str) -> Result<usize, String> {
    let mut size = None;
    for (key, value) in query_pairs(path) {
        if key != "size" {
            return Err(format!("Unknown parameter '{}'", key));
        }
        size = Some(
            value
                .parse::<usize>()
                .map_err(|_| format!("Invalid size '{}'", value))?,
        );
    }
    match size {
        Some(0) => Err("Vote window size must be at least 1".to_string()),
        Some(size) => Ok(size),
        None => Err("Missing size".to_string()),
    }
}

fn respond_bounds(bounds: &BoundsHandle, path: &str) -> Response {
    let updated = match parse_bounds(bounds.current(), path) {
        Ok(updated) => updated,
        Err(e) => return Response::new(400, e),
    };
    match bounds.set(updated) {
        Ok(()) => {
            info!("[TRIGGER] Bounds now {:?}", updated);
            Response::new(
                200,
                format!(
                    "BOUNDS OK min={} max={} vertical_step={} horizontal_step={}",
                    updated.min, updated.max, updated.vertical_step, updated.horizontal_step
                ),
            )
        }
        Err(e) => Response::new(400, e.to_string()),
    }
}

fn respond_window(window: &watch::Sender<usize>, path: &str) -> Response {
    match parse_window(path) {
        Ok(size) => {
            window.send_replace(size);
            info!("[TRIGGER] Vote window now {}", size);
            Response::new(200, format!("WINDOW OK size={}", size))
        }
        Err(e) => Response::new(400, e),
    }
}

/// Build the response for one request line
pub fn respond(controls: &Controls, request_line: &str) -> Response {
    let mut parts = request_line.split_whitespace();
    let (Some("GET"), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Response::new(400, "Bad Request");
    };
    if !version.starts_with("HTTP/") || parts.next().is_some() {
        return Response::new(400, "Bad Request");
    }

    match path.split('?').next().unwrap_or(path) {
        "/bounds" => return respond_bounds(&controls.bounds, path),
        "/window" => return respond_window(&controls.window, path),
        _ => {}
    }

    let Some(kind) = route(path) else {
        return Response::new(404, "Unknown command");
    };

    match controls.gateway.enqueue(kind) {
        Ok(id) => Response::new(200, format!("{} OK #{}", kind.as_str().to_uppercase(), id)),
        Err(ControlError::GatewayClosed) => Response::new(503, "Gateway closed"),
        Err(e) => Response::new(400, e.to_string()),
    }
}

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, controls: Controls) -> anyhow::Result<()> {
    info!("[TRIGGER] Listening on {}", listener.local_addr()?);

    loop {
        let (socket, addr) = listener.accept().await.context("Accept failed")?;
        let controls = controls.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, addr, &controls).await {
                warn!("[TRIGGER] {}: {:#}", addr, e);
            }
        });
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    controls: &Controls,
) -> anyhow::Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader.take(MAX_HEAD_BYTES));

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Skip headers; the request line carries everything we need
    let mut header = String::new();
    loop {
        header.clear();
        if reader.read_line(&mut header).await? == 0 || header.trim().is_empty() {
            break;
        }
    }

    let response = respond(controls, request_line.trim_end());
    debug!("[TRIGGER] {} '{}' -> {}", addr, request_line.trim_end(), response.status);
    writer.write_all(&response.to_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}
