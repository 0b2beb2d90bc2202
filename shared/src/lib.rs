//! gesture-flight shared core
//!
//! This crate provides the runtime-free pieces of the gesture control core:
//! the gesture vocabulary, the vote aggregator, the flight state machine and
//! the error taxonomy reported by the command gateway.

pub mod error;
pub mod state_machine;
pub mod vote;

use std::fmt;
use std::sync::Arc;

pub use error::{BoundsError, ControlError, Rejection, VoteError};
pub use state_machine::{Bounds, FlightPhase, FlightState, Maneuver};
pub use vote::{GestureMap, ResolvedDecision, Vocabulary, VoteAggregator};

/// Default parameters for the control core
pub mod defaults {
    /// Number of detected frames that make up one vote window
    pub const VOTE_WINDOW: usize = 10;

    /// Age after which a queued command is dropped instead of executed
    pub const STALE_THRESHOLD_MS: u64 = 1000;

    /// Gateway worker dequeue poll interval
    pub const POLL_INTERVAL_MS: u64 = 100;

    /// Altitude recorded after a successful take-off (cm)
    pub const TAKEOFF_ALTITUDE_CM: i32 = 100;

    /// Lowest altitude a descent may reach (cm)
    pub const MIN_ALTITUDE_CM: i32 = 40;

    /// Highest altitude an ascent may reach (cm)
    pub const MAX_ALTITUDE_CM: i32 = 250;

    /// Distance of one MoveUp / MoveDown (cm)
    pub const VERTICAL_STEP_CM: i32 = 20;

    /// Distance of one MoveLeft / MoveRight (cm)
    pub const HORIZONTAL_STEP_CM: i32 = 100;

    /// Port probed when scanning for fleet units
    pub const FLEET_CONTROL_PORT: u16 = 8889;
}

/// A symbolic action classified from a single frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GestureLabel(Arc<str>);

impl GestureLabel {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(Arc::from(label.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GestureLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// How many physical units a connect request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// One unit at a configured address
    Single,
    /// Every unit found by discovery
    Fleet,
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectMode::Single => write!(f, "single"),
            ConnectMode::Fleet => write!(f, "fleet"),
        }
    }
}

/// The fixed command vocabulary accepted by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    TakeOff,
    Land,
    ConnectSingle,
    ConnectSwarm,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::MoveUp,
        CommandKind::MoveDown,
        CommandKind::MoveLeft,
        CommandKind::MoveRight,
        CommandKind::TakeOff,
        CommandKind::Land,
        CommandKind::ConnectSingle,
        CommandKind::ConnectSwarm,
    ];

    /// The connect command for `mode`
    pub fn connect(mode: ConnectMode) -> Self {
        match mode {
            ConnectMode::Single => CommandKind::ConnectSingle,
            ConnectMode::Fleet => CommandKind::ConnectSwarm,
        }
    }

    /// Connect mode for connect commands
    pub fn connect_mode(self) -> Option<ConnectMode> {
        match self {
            CommandKind::ConnectSingle => Some(ConnectMode::Single),
            CommandKind::ConnectSwarm => Some(ConnectMode::Fleet),
            _ => None,
        }
    }

    pub fn is_movement(self) -> bool {
        matches!(
            self,
            CommandKind::MoveUp | CommandKind::MoveDown | CommandKind::MoveLeft | CommandKind::MoveRight
        )
    }

    /// Short lowercase name, also used as the trigger endpoint path
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::MoveUp => "up",
            CommandKind::MoveDown => "down",
            CommandKind::MoveLeft => "left",
            CommandKind::MoveRight => "right",
            CommandKind::TakeOff => "takeoff",
            CommandKind::Land => "land",
            CommandKind::ConnectSingle => "connect",
            CommandKind::ConnectSwarm => "connect_swarm",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
