//! Gateway worker - the single consumer that drives the flight session
//!
//! Requests are handled strictly one at a time in arrival order. A request
//! that waited longer than the stale threshold is dropped without touching
//! the session. Outcomes are reported on an unbounded event channel.

use super::queue::{CommandRequest, GatewayConfig};
use crate::session::{Completed, FlightSession};
use gesture_flight_shared::{CommandKind, ControlError, Rejection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

/// Why the worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A land command completed; the session is over
    Landed,
    /// The gateway was shut down and the queue drained
    Shutdown,
}

/// Outcome notifications from the worker
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Executed {
        request: CommandRequest,
        completed: Completed,
    },
    /// Too old when dequeued; never reached the session
    Dropped {
        request: CommandRequest,
        error: ControlError,
    },
    /// Refused by the session's legality rules
    Rejected {
        request: CommandRequest,
        error: ControlError,
    },
    /// Connect or actuator failure
    Failed {
        request: CommandRequest,
        error: ControlError,
    },
    Stopped(StopReason),
}

/// Owns the receive side of the gateway queue
pub struct GatewayWorker {
    config: GatewayConfig,
    rx: mpsc::UnboundedReceiver<CommandRequest>,
    closed: Arc<AtomicBool>,
}

impl GatewayWorker {
    pub(super) fn new(
        config: GatewayConfig,
        rx: mpsc::UnboundedReceiver<CommandRequest>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self { config, rx, closed }
    }

    /// Drain the queue into `session` until landing or shutdown
    ///
    /// The session is handed back so a later connect can reuse it.
    pub async fn run(
        mut self,
        mut session: FlightSession,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> FlightSession {
        info!(
            "[GATEWAY] Worker started (stale threshold {:?})",
            self.config.stale_threshold
        );

        let mut reason = loop {
            let request = match timeout(self.config.poll_interval, self.rx.recv()).await {
                Ok(Some(request)) => request,
                Ok(None) => break StopReason::Shutdown,
                Err(_) => {
                    if self.closed.load(Ordering::SeqCst) {
                        break StopReason::Shutdown;
                    }
                    continue;
                }
            };

            if handle(&self.config, &mut session, request, &events).await {
                break StopReason::Landed;
            }
        };

        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();

        // Requests accepted before the close still get an outcome
        while let Ok(request) = self.rx.try_recv() {
            if reason == StopReason::Landed {
                let error = ControlError::from(Rejection::NotConnected);
                debug!("[GATEWAY] #{} {} rejected after landing", request.id, request.kind);
                let _ = events.send(GatewayEvent::Rejected { request, error });
            } else if handle(&self.config, &mut session, request, &events).await {
                reason = StopReason::Landed;
            }
        }

        info!("[GATEWAY] Worker stopped: {:?}", reason);
        let _ = events.send(GatewayEvent::Stopped(reason));
        session
    }
}

/// Execute one request and report its outcome. Returns true after a
/// successful landing.
async fn handle(
    config: &GatewayConfig,
    session: &mut FlightSession,
    request: CommandRequest,
    events: &mpsc::UnboundedSender<GatewayEvent>,
) -> bool {
    let age = request.age();
    if age > config.stale_threshold {
        let error = ControlError::StaleCommand {
            kind: request.kind,
            age,
            threshold: config.stale_threshold,
        };
        debug!("[GATEWAY] #{} {}", request.id, error);
        let _ = events.send(GatewayEvent::Dropped { request, error });
        return false;
    }

    match session.execute(request.kind).await {
        Ok(completed) => {
            debug!(
                "[GATEWAY] #{} {} done ({} at {}cm)",
                request.id, request.kind, completed.phase, completed.altitude
            );
            let _ = events.send(GatewayEvent::Executed { request, completed });
            request.kind == CommandKind::Land
        }
        Err(error) if error.is_rejection() => {
            debug!("[GATEWAY] #{} {} rejected: {}", request.id, request.kind, error);
            let _ = events.send(GatewayEvent::Rejected { request, error });
            false
        }
        Err(error) => {
            debug!("[GATEWAY] #{} {}", request.id, error);
            let _ = events.send(GatewayEvent::Failed { request, error });
            false
        }
    }
}
