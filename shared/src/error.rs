//! Error taxonomy of the control core
//!
//! Every failure is reported to observers rather than terminating the
//! process. Legality rejections never reach the actuator.

use std::time::Duration;
use thiserror::Error;

use crate::{CommandKind, GestureLabel};

/// Errors raised by the vote aggregator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("Label '{0}' is not part of the configured vocabulary")]
    InvalidLabel(GestureLabel),

    #[error("Vote window size must be at least 1")]
    InvalidWindow,
}

/// Legality rejections from the flight state machine
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("Vehicle is not connected")]
    NotConnected,

    #[error("Vehicle is not airborne")]
    NotAirborne,

    #[error("Vehicle is already airborne")]
    AlreadyAirborne,

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Maximum altitude reached: {altitude} + {step} > {max}")]
    AltitudeLimitReached { altitude: i32, step: i32, max: i32 },

    #[error("Minimum altitude reached: {altitude} - {step} < {min}")]
    AltitudeFloorReached { altitude: i32, step: i32, min: i32 },
}

/// Invalid altitude bounds
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    #[error("Minimum altitude {min} exceeds maximum {max}")]
    Inverted { min: i32, max: i32 },

    #[error("Step sizes must be positive (vertical={vertical}, horizontal={horizontal})")]
    NonPositiveStep { vertical: i32, horizontal: i32 },
}

/// Everything the gateway reports to its observers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("Label '{0}' is not part of the configured vocabulary")]
    InvalidLabel(GestureLabel),

    #[error("Vote window size must be at least 1")]
    InvalidWindow,

    #[error("Command gateway is closed")]
    GatewayClosed,

    #[error("Command {kind} dropped: {age:?} old (threshold {threshold:?})")]
    StaleCommand {
        kind: CommandKind,
        age: Duration,
        threshold: Duration,
    },

    #[error("Command rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Actuator failure during {kind}: {reason}")]
    ActuatorFailure { kind: CommandKind, reason: String },

    #[error("Connect failed: {reason}")]
    ConnectFailure { reason: String },
}

impl From<VoteError> for ControlError {
    fn from(err: VoteError) -> Self {
        match err {
            VoteError::InvalidLabel(label) => ControlError::InvalidLabel(label),
            VoteError::InvalidWindow => ControlError::InvalidWindow,
        }
    }
}

impl ControlError {
    /// True for legality rejections (no actuator call was made)
    pub fn is_rejection(&self) -> bool {
        matches!(self, ControlError::Rejected(_))
    }

    /// The rejection, if this error is one
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            ControlError::Rejected(rejection) => Some(*rejection),
            _ => None,
        }
    }
}
