//! Producer side of the command gateway

use super::worker::GatewayWorker;
use gesture_flight_shared::{defaults, CommandKind, ControlError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Gateway timing
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Requests older than this when dequeued are dropped
    pub stale_threshold: Duration,
    /// Worker dequeue wait; bounds how long shutdown takes to notice
    pub poll_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_millis(defaults::STALE_THRESHOLD_MS),
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }
}

/// A timestamped command waiting for the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    pub id: u64,
    pub kind: CommandKind,
    pub enqueued_at: Instant,
}

impl CommandRequest {
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Thread-safe handle for submitting commands
///
/// Cheap to clone; every clone feeds the same FIFO queue.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    tx: mpsc::UnboundedSender<CommandRequest>,
    closed: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl CommandGateway {
    /// Create a gateway and the worker that will drain it
    pub fn new(config: GatewayConfig) -> (Self, GatewayWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let gateway = Self {
            tx,
            closed: closed.clone(),
            next_id: Arc::new(AtomicU64::new(0)),
        };
        let worker = GatewayWorker::new(config, rx, closed);
        (gateway, worker)
    }

    /// Queue a command. Never blocks; returns the request id.
    pub fn enqueue(&self, kind: CommandKind) -> Result<u64, ControlError> {
        if self.is_closed() {
            return Err(ControlError::GatewayClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = CommandRequest {
            id,
            kind,
            enqueued_at: Instant::now(),
        };
        self.tx.send(request).map_err(|_| ControlError::GatewayClosed)?;

        debug!("[GATEWAY] Queued #{} {}", id, kind);
        Ok(id)
    }

    /// Stop accepting commands. Already queued commands are still drained.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}
