//! Flight session
//!
//! This module handles:
//! - Connection lifecycle of a single unit or a fleet
//! - Altitude bookkeeping and command legality
//! - Publishing snapshots and accepting bound changes from other tasks

mod flight;
mod status;

pub use flight::{Completed, FlightSession, SessionConfig};
pub use status::{BoundsHandle, FlightSnapshot};
