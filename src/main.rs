mod config;
mod gateway;
mod perception;
mod session;
mod trigger;
mod vehicle;

use anyhow::Context;
use config::{AppConfig, VehicleMode};
use gateway::{CommandGateway, GatewayEvent, StopReason};
use gesture_flight_shared::{CommandKind, GestureMap, Vocabulary, VoteAggregator};
use perception::{LabelClassifier, LineSource, PerceptionLoop};
use session::{FlightSession, FlightSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use trigger::Controls;
use vehicle::{Discovery, Link, MavlinkLink, PortScanDiscovery, SimLink, StaticDiscovery};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let result = runtime.block_on(run());

    // A pending stdin read occupies a blocking thread that cannot be cancelled
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    info!("gesture-flight starting");
    info!("  Vehicle: {}", config.vehicle);
    info!("  Vote window: {} frames", config.vote_window);
    info!("  Stale threshold: {:?}", config.gateway.stale_threshold);
    info!(
        "  Bounds: {}..{}cm (step {}/{}cm)",
        config.bounds.min,
        config.bounds.max,
        config.bounds.vertical_step,
        config.bounds.horizontal_step
    );

    // Kept for the end-of-run call summary
    let mut sim = None;
    let link: Arc<dyn Link> = match config.vehicle {
        VehicleMode::Sim => {
            let link = SimLink::with_fleet_size(config.sim_fleet_size)
                .with_latency(config.sim_latency);
            sim = Some(link.clone());
            Arc::new(link)
        }
        VehicleMode::Mavlink => {
            let discovery: Box<dyn Discovery> = if config.fleet_addrs.is_empty() {
                Box::new(PortScanDiscovery::new(config.scan.clone()))
            } else {
                info!("  Fleet: {} known units", config.fleet_addrs.len());
                Box::new(StaticDiscovery::new(config.fleet_addrs.clone()))
            };
            Arc::new(MavlinkLink::new(config.mavlink.clone(), discovery))
        }
    };

    let session = FlightSession::new(config.session.clone(), config.bounds, link)
        .context("Invalid altitude bounds")?;
    let status_rx = session.subscribe();
    tokio::spawn(report_status(status_rx));
    let bounds = session.bounds_handle();
    let (window_tx, window_rx) = watch::channel(config.vote_window);

    // Gateway worker owns the session until it stops
    let (gateway, worker) = CommandGateway::new(config.gateway.clone());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let worker_handle = tokio::spawn(worker.run(session, event_tx));
    tokio::spawn(handle_gateway_events(event_rx));

    if let Some(addr) = config.trigger_addr {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind trigger server on {}", addr))?;
        let controls = Controls {
            gateway: gateway.clone(),
            bounds,
            window: Arc::new(window_tx),
        };
        tokio::spawn(async move {
            if let Err(e) = trigger::serve(listener, controls).await {
                error!("[TRIGGER] Server stopped: {:#}", e);
            }
        });
    }

    match config.connect {
        Some(mode) => {
            let id = gateway.enqueue(CommandKind::connect(mode))?;
            info!("Requested {} connect (#{})", mode, id);
        }
        None => info!("Perception-only mode, no vehicle connect"),
    }

    let aggregator = VoteAggregator::new(Vocabulary::default(), config.vote_window)?;
    let perception = PerceptionLoop::new(
        LineSource::new(BufReader::new(tokio::io::stdin())),
        LabelClassifier,
        aggregator,
        GestureMap::default(),
        gateway.clone(),
    )
    .with_window_updates(window_rx);

    tokio::select! {
        result = perception.run() => match result {
            Ok(stats) => info!(
                "Perception finished: {} frames, {} detections, {} decisions, {} commands, {} invalid labels",
                stats.frames, stats.detections, stats.decisions, stats.enqueued, stats.invalid_labels
            ),
            Err(e) => error!("Perception failed: {:#}", e),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, landing");
        }
    }

    // Always finish with a landing request
    match gateway.enqueue(CommandKind::Land) {
        Ok(id) => info!("Requested land (#{})", id),
        Err(e) => debug!("Land not queued: {}", e),
    }
    gateway.shutdown();

    // The queued land may have gone stale behind slow commands
    let mut session = worker_handle.await.context("Gateway worker panicked")?;
    if let Err(e) = session.ensure_landed().await {
        error!("Final landing failed: {}", e);
    }
    info!(
        "Session ended: {} at {}cm",
        session.phase(),
        session.altitude()
    );

    if let Some(sim) = sim {
        let calls = sim.calls().await;
        info!("[SIM] {} actuator calls", calls.len());
        for call in calls {
            debug!("[SIM] unit {} {}", call.unit, call.op.name());
        }
    }
    Ok(())
}

/// Log every published session snapshot
async fn report_status(mut status_rx: watch::Receiver<FlightSnapshot>) {
    while status_rx.changed().await.is_ok() {
        let snapshot = *status_rx.borrow_and_update();
        info!(
            "[STATUS] {} at {}cm ({} units, bounds {}..{}cm)",
            snapshot.phase,
            snapshot.altitude,
            snapshot.units,
            snapshot.bounds.min,
            snapshot.bounds.max
        );
    }
}

/// Report gateway outcomes
async fn handle_gateway_events(mut event_rx: mpsc::UnboundedReceiver<GatewayEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            GatewayEvent::Executed { request, completed } => {
                info!(
                    "#{} {} completed ({} at {}cm)",
                    request.id, completed.kind, completed.phase, completed.altitude
                );
            }
            GatewayEvent::Dropped { request, error } => {
                warn!("#{} {}", request.id, error);
            }
            GatewayEvent::Rejected { request, error } => {
                info!("#{} {} rejected: {}", request.id, request.kind, error);
            }
            GatewayEvent::Failed { request, error } => {
                error!("#{} {} failed: {}", request.id, request.kind, error);
            }
            GatewayEvent::Stopped(StopReason::Landed) => {
                info!("Vehicle landed, gateway closed");
            }
            GatewayEvent::Stopped(StopReason::Shutdown) => {
                info!("Gateway shut down");
            }
        }
    }
}
