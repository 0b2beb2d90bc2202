//! Flight session - owns the vehicle link and the flight state
//!
//! Every actuator call in the system goes through [`FlightSession::execute`].
//! Commands are authorised against the current phase and bounds first;
//! rejected commands never reach the actuator. Any actuator failure drops
//! the link and returns the session to `Disconnected`.

use super::status::{BoundsHandle, FlightSnapshot};
use crate::vehicle::{Actuator, Link};
use gesture_flight_shared::{
    defaults, Bounds, BoundsError, CommandKind, ConnectMode, ControlError, FlightPhase,
    FlightState, Maneuver, Rejection,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Session behaviour settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Altitude recorded after take-off (cm)
    pub takeoff_altitude: i32,
    /// Take off as soon as a connect succeeds
    pub auto_takeoff: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            takeoff_altitude: defaults::TAKEOFF_ALTITUDE_CM,
            auto_takeoff: true,
        }
    }
}

/// Result of a successfully executed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completed {
    pub kind: CommandKind,
    pub phase: FlightPhase,
    pub altitude: i32,
}

/// The stateful owner of connection and altitude legality
pub struct FlightSession {
    config: SessionConfig,
    state: FlightState,
    link: Arc<dyn Link>,
    actuator: Option<Box<dyn Actuator>>,
    bounds: BoundsHandle,
    status: watch::Sender<FlightSnapshot>,
}

impl FlightSession {
    /// Create a disconnected session
    pub fn new(config: SessionConfig, bounds: Bounds, link: Arc<dyn Link>) -> Result<Self, BoundsError> {
        let bounds = BoundsHandle::new(bounds)?;
        let state = FlightState::new();
        let (status, _rx) = watch::channel(FlightSnapshot {
            phase: state.phase(),
            altitude: state.altitude(),
            bounds: bounds.current(),
            units: 0,
        });

        Ok(Self {
            config,
            state,
            link,
            actuator: None,
            bounds,
            status,
        })
    }

    pub fn phase(&self) -> FlightPhase {
        self.state.phase()
    }

    pub fn altitude(&self) -> i32 {
        self.state.altitude()
    }

    /// Handle for changing bounds from other tasks
    pub fn bounds_handle(&self) -> BoundsHandle {
        self.bounds.clone()
    }

    /// Receive a snapshot after every transition
    pub fn subscribe(&self) -> watch::Receiver<FlightSnapshot> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> FlightSnapshot {
        FlightSnapshot {
            phase: self.state.phase(),
            altitude: self.state.altitude(),
            bounds: self.bounds.current(),
            units: self.actuator.as_ref().map_or(0, |actuator| actuator.units()),
        }
    }

    /// Authorise and execute one command
    pub async fn execute(&mut self, kind: CommandKind) -> Result<Completed, ControlError> {
        let bounds = self.bounds.current();
        let maneuver = self.state.authorize(kind, &bounds)?;

        let result = match maneuver {
            Maneuver::Connect(mode) => self.connect(kind, mode).await,
            Maneuver::TakeOff => self.take_off(kind).await,
            Maneuver::Land => self.land(kind).await,
            movement => self.actuate(kind, movement).await.map(|()| self.state.apply(movement)),
        };
        self.publish();

        result.map(|()| Completed {
            kind,
            phase: self.state.phase(),
            altitude: self.state.altitude(),
        })
    }

    /// Land whatever is still attached, bypassing the gateway queue
    ///
    /// Used once the gateway worker has stopped, so a landing request that
    /// went stale in the queue cannot leave the vehicle in the air.
    pub async fn ensure_landed(&mut self) -> Result<Option<Completed>, ControlError> {
        if self.actuator.is_none() {
            return Ok(None);
        }
        info!("[SESSION] Landing {} vehicle before exit", self.state.phase());
        self.execute(CommandKind::Land).await.map(Some)
    }

    async fn connect(&mut self, kind: CommandKind, mode: ConnectMode) -> Result<(), ControlError> {
        self.state.begin_connect();
        self.publish();
        info!("[SESSION] Connecting ({} mode) via {}", mode, self.link.name());

        let actuator = match open_actuator(self.link.as_ref(), mode).await {
            Ok(actuator) => actuator,
            Err(e) => {
                self.state.disconnected();
                warn!("[SESSION] Connect failed: {:#}", e);
                return Err(ControlError::ConnectFailure {
                    reason: format!("{:#}", e),
                });
            }
        };

        info!("[SESSION] Connected to {} ({} units)", actuator.name(), actuator.units());
        self.actuator = Some(actuator);
        self.state.connected();

        if self.config.auto_takeoff {
            self.publish();
            self.take_off(kind).await?;
        }
        Ok(())
    }

    async fn take_off(&mut self, kind: CommandKind) -> Result<(), ControlError> {
        self.actuate(kind, Maneuver::TakeOff).await?;
        self.state.took_off(self.config.takeoff_altitude);
        info!("[SESSION] Airborne at {}cm", self.state.altitude());
        Ok(())
    }

    async fn land(&mut self, kind: CommandKind) -> Result<(), ControlError> {
        self.state.begin_landing();
        self.publish();

        self.actuate(kind, Maneuver::Land).await?;
        if let Some(mut actuator) = self.actuator.take() {
            if let Err(e) = actuator.disconnect().await {
                warn!("[SESSION] Disconnect after landing failed: {:#}", e);
            }
        }
        self.state.apply(Maneuver::Land);
        info!("[SESSION] Landed and disconnected");
        Ok(())
    }

    /// Make the actuator call for an authorised maneuver
    async fn actuate(&mut self, kind: CommandKind, maneuver: Maneuver) -> Result<(), ControlError> {
        let Some(actuator) = self.actuator.as_mut() else {
            self.state.disconnected();
            return Err(Rejection::NotConnected.into());
        };

        let result = match maneuver {
            Maneuver::Connect(_) => actuator.connect().await,
            Maneuver::TakeOff => actuator.takeoff().await,
            Maneuver::Land => actuator.land().await,
            Maneuver::Ascend(cm) => actuator.move_up(cm).await,
            Maneuver::Descend(cm) => actuator.move_down(cm).await,
            Maneuver::Left(cm) => actuator.move_left(cm).await,
            Maneuver::Right(cm) => actuator.move_right(cm).await,
        };

        if let Err(e) = result {
            warn!("[SESSION] {} failed, dropping link: {:#}", kind, e);
            self.actuator = None;
            self.state.disconnected();
            return Err(ControlError::ActuatorFailure {
                kind,
                reason: format!("{:#}", e),
            });
        }
        Ok(())
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}

/// Open and connect an actuator for `mode`
async fn open_actuator(link: &dyn Link, mode: ConnectMode) -> anyhow::Result<Box<dyn Actuator>> {
    let mut actuator = link.open(mode).await?;
    actuator.connect().await?;
    Ok(actuator)
}
