//! Flight State Machine
//!
//! Tracks session phase and advisory altitude, and decides whether a
//! command is legal before any actuator call is made.
//!
//! ```text
//! Disconnected -> Connecting -> Grounded -> Airborne -> Landing -> Disconnected
//! ```

use std::fmt;

use crate::{defaults, BoundsError, CommandKind, ConnectMode, Rejection};

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightPhase {
    #[default]
    Disconnected,
    Connecting,
    Grounded,
    Airborne,
    Landing,
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightPhase::Disconnected => "disconnected",
            FlightPhase::Connecting => "connecting",
            FlightPhase::Grounded => "grounded",
            FlightPhase::Airborne => "airborne",
            FlightPhase::Landing => "landing",
        };
        f.write_str(name)
    }
}

/// Altitude limits and step sizes, in centimetres
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
    pub vertical_step: i32,
    pub horizontal_step: i32,
}

impl Bounds {
    pub fn validate(&self) -> Result<(), BoundsError> {
        if self.min > self.max {
            return Err(BoundsError::Inverted {
                min: self.min,
                max: self.max,
            });
        }
        if self.vertical_step <= 0 || self.horizontal_step <= 0 {
            return Err(BoundsError::NonPositiveStep {
                vertical: self.vertical_step,
                horizontal: self.horizontal_step,
            });
        }
        Ok(())
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: defaults::MIN_ALTITUDE_CM,
            max: defaults::MAX_ALTITUDE_CM,
            vertical_step: defaults::VERTICAL_STEP_CM,
            horizontal_step: defaults::HORIZONTAL_STEP_CM,
        }
    }
}

/// An authorised actuator action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maneuver {
    Connect(ConnectMode),
    TakeOff,
    Ascend(u32),
    Descend(u32),
    Left(u32),
    Right(u32),
    Land,
}

/// Phase and altitude bookkeeping for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlightState {
    phase: FlightPhase,
    altitude: i32,
}

impl FlightState {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn altitude(&self) -> i32 {
        self.altitude
    }

    /// Check a command against the current phase and bounds
    pub fn authorize(&self, kind: CommandKind, bounds: &Bounds) -> Result<Maneuver, Rejection> {
        use FlightPhase::*;

        match kind {
            CommandKind::ConnectSingle | CommandKind::ConnectSwarm => match self.phase {
                Disconnected => Ok(Maneuver::Connect(
                    kind.connect_mode().unwrap_or(ConnectMode::Single),
                )),
                _ => Err(Rejection::AlreadyConnected),
            },

            CommandKind::TakeOff => match self.phase {
                Grounded => Ok(Maneuver::TakeOff),
                Airborne => Err(Rejection::AlreadyAirborne),
                Disconnected => Err(Rejection::NotConnected),
                Connecting | Landing => Err(Rejection::NotAirborne),
            },

            // Landing is accepted whenever a vehicle is attached
            CommandKind::Land => match self.phase {
                Grounded | Airborne | Landing => Ok(Maneuver::Land),
                Disconnected | Connecting => Err(Rejection::NotConnected),
            },

            CommandKind::MoveUp => {
                self.require_airborne()?;
                let step = bounds.vertical_step;
                let within = self
                    .altitude
                    .checked_add(step)
                    .is_some_and(|target| target <= bounds.max);
                if !within {
                    return Err(Rejection::AltitudeLimitReached {
                        altitude: self.altitude,
                        step,
                        max: bounds.max,
                    });
                }
                Ok(Maneuver::Ascend(step.unsigned_abs()))
            }

            CommandKind::MoveDown => {
                self.require_airborne()?;
                let step = bounds.vertical_step;
                let within = self
                    .altitude
                    .checked_sub(step)
                    .is_some_and(|target| target >= bounds.min);
                if !within {
                    return Err(Rejection::AltitudeFloorReached {
                        altitude: self.altitude,
                        step,
                        min: bounds.min,
                    });
                }
                Ok(Maneuver::Descend(step.unsigned_abs()))
            }

            CommandKind::MoveLeft => {
                self.require_airborne()?;
                Ok(Maneuver::Left(bounds.horizontal_step.unsigned_abs()))
            }

            CommandKind::MoveRight => {
                self.require_airborne()?;
                Ok(Maneuver::Right(bounds.horizontal_step.unsigned_abs()))
            }
        }
    }

    fn require_airborne(&self) -> Result<(), Rejection> {
        match self.phase {
            FlightPhase::Airborne => Ok(()),
            FlightPhase::Disconnected => Err(Rejection::NotConnected),
            _ => Err(Rejection::NotAirborne),
        }
    }

    /// Connect attempt started
    pub fn begin_connect(&mut self) {
        self.phase = FlightPhase::Connecting;
    }

    /// Vehicle link established, still on the ground
    pub fn connected(&mut self) {
        self.phase = FlightPhase::Grounded;
        self.altitude = 0;
    }

    /// Take-off completed; altitude resets to the baseline
    pub fn took_off(&mut self, baseline: i32) {
        self.phase = FlightPhase::Airborne;
        self.altitude = baseline;
    }

    /// Record a completed maneuver
    pub fn apply(&mut self, maneuver: Maneuver) {
        match maneuver {
            Maneuver::Ascend(step) => {
                self.altitude = self.altitude.saturating_add_unsigned(step)
            }
            Maneuver::Descend(step) => {
                self.altitude = self.altitude.saturating_sub_unsigned(step)
            }
            Maneuver::Left(_) | Maneuver::Right(_) => {}
            Maneuver::Connect(_) => self.connected(),
            Maneuver::TakeOff => self.phase = FlightPhase::Airborne,
            Maneuver::Land => self.disconnected(),
        }
    }

    /// Landing call issued
    pub fn begin_landing(&mut self) {
        self.phase = FlightPhase::Landing;
    }

    /// Session closed: landed, connect failed or link lost
    pub fn disconnected(&mut self) {
        self.phase = FlightPhase::Disconnected;
        self.altitude = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn airborne(altitude: i32) -> FlightState {
        let mut state = FlightState::new();
        state.begin_connect();
        state.connected();
        state.took_off(altitude);
        state
    }

    #[test]
    fn test_initial_state() {
        let state = FlightState::new();
        assert_eq!(state.phase(), FlightPhase::Disconnected);
        assert_eq!(state.altitude(), 0);
    }

    #[test]
    fn test_altitude_clamping() {
        let bounds = Bounds {
            min: 40,
            max: 250,
            vertical_step: 20,
            horizontal_step: 100,
        };
        let mut state = airborne(100);

        for _ in 0..7 {
            let maneuver = state.authorize(CommandKind::MoveUp, &bounds).unwrap();
            assert_eq!(maneuver, Maneuver::Ascend(20));
            state.apply(maneuver);
        }
        assert_eq!(state.altitude(), 240);

        let result = state.authorize(CommandKind::MoveUp, &bounds);
        assert_eq!(
            result,
            Err(Rejection::AltitudeLimitReached {
                altitude: 240,
                step: 20,
                max: 250
            })
        );
        assert_eq!(state.altitude(), 240);
    }

    #[test]
    fn test_altitude_floor() {
        let bounds = Bounds::default();
        let mut state = airborne(100);

        for _ in 0..3 {
            let maneuver = state.authorize(CommandKind::MoveDown, &bounds).unwrap();
            state.apply(maneuver);
        }
        assert_eq!(state.altitude(), 40);
        assert!(matches!(
            state.authorize(CommandKind::MoveDown, &bounds),
            Err(Rejection::AltitudeFloorReached { .. })
        ));
    }

    #[test]
    fn test_oversized_steps_are_refused() {
        let mut state = airborne(100);
        let bounds = Bounds {
            min: i32::MIN,
            max: i32::MAX,
            vertical_step: i32::MAX,
            horizontal_step: 100,
        };
        assert_eq!(
            state.authorize(CommandKind::MoveUp, &bounds),
            Err(Rejection::AltitudeLimitReached {
                altitude: 100,
                step: i32::MAX,
                max: i32::MAX
            })
        );

        state.took_off(-100);
        assert!(matches!(
            state.authorize(CommandKind::MoveDown, &bounds),
            Err(Rejection::AltitudeFloorReached { .. })
        ));
        assert_eq!(state.altitude(), -100);
    }

    #[test]
    fn test_moves_require_airborne() {
        let bounds = Bounds::default();
        let mut state = FlightState::new();

        assert_eq!(
            state.authorize(CommandKind::MoveLeft, &bounds),
            Err(Rejection::NotConnected)
        );

        state.begin_connect();
        state.connected();
        assert_eq!(state.phase(), FlightPhase::Grounded);
        for kind in [
            CommandKind::MoveUp,
            CommandKind::MoveDown,
            CommandKind::MoveLeft,
            CommandKind::MoveRight,
        ] {
            assert_eq!(state.authorize(kind, &bounds), Err(Rejection::NotAirborne));
        }
    }

    #[test]
    fn test_horizontal_moves_keep_altitude() {
        let bounds = Bounds::default();
        let mut state = airborne(100);

        let maneuver = state.authorize(CommandKind::MoveRight, &bounds).unwrap();
        assert_eq!(maneuver, Maneuver::Right(100));
        state.apply(maneuver);
        let maneuver = state.authorize(CommandKind::MoveLeft, &bounds).unwrap();
        state.apply(maneuver);
        assert_eq!(state.altitude(), 100);
        assert_eq!(state.phase(), FlightPhase::Airborne);
    }

    #[test]
    fn test_land_accepted_when_attached() {
        let bounds = Bounds::default();
        let mut state = FlightState::new();
        assert_eq!(state.authorize(CommandKind::Land, &bounds), Err(Rejection::NotConnected));

        state.begin_connect();
        assert_eq!(state.authorize(CommandKind::Land, &bounds), Err(Rejection::NotConnected));

        state.connected();
        assert_eq!(state.authorize(CommandKind::Land, &bounds), Ok(Maneuver::Land));

        let mut state = airborne(250);
        assert_eq!(state.authorize(CommandKind::Land, &bounds), Ok(Maneuver::Land));
        state.begin_landing();
        assert_eq!(state.authorize(CommandKind::Land, &bounds), Ok(Maneuver::Land));
        state.apply(Maneuver::Land);
        assert_eq!(state.phase(), FlightPhase::Disconnected);
        assert_eq!(state.altitude(), 0);
    }

    #[test]
    fn test_connect_and_takeoff_legality() {
        let bounds = Bounds::default();
        let mut state = FlightState::new();
        assert_eq!(
            state.authorize(CommandKind::ConnectSwarm, &bounds),
            Ok(Maneuver::Connect(ConnectMode::Fleet))
        );
        assert_eq!(state.authorize(CommandKind::TakeOff, &bounds), Err(Rejection::NotConnected));

        state.begin_connect();
        state.connected();
        assert_eq!(
            state.authorize(CommandKind::ConnectSingle, &bounds),
            Err(Rejection::AlreadyConnected)
        );
        assert_eq!(state.authorize(CommandKind::TakeOff, &bounds), Ok(Maneuver::TakeOff));

        state.took_off(100);
        assert_eq!(
            state.authorize(CommandKind::TakeOff, &bounds),
            Err(Rejection::AlreadyAirborne)
        );
    }

    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::default().validate().is_ok());

        let inverted = Bounds {
            min: 300,
            ..Bounds::default()
        };
        assert!(matches!(inverted.validate(), Err(BoundsError::Inverted { .. })));

        let flat = Bounds {
            vertical_step: 0,
            ..Bounds::default()
        };
        assert!(matches!(
            flat.validate(),
            Err(BoundsError::NonPositiveStep { .. })
        ));
    }
}
