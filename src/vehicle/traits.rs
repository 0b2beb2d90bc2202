//! Actuator and link abstractions for pluggable vehicle backends

use anyhow::Result;
use async_trait::async_trait;
use gesture_flight_shared::ConnectMode;

/// Movement primitives of one vehicle (or a fleet acting as one)
///
/// Every call completes before it returns; the flight session never issues
/// overlapping calls. Distances are centimetres.
#[async_trait]
pub trait Actuator: Send {
    /// Establish the control session
    async fn connect(&mut self) -> Result<()>;

    async fn takeoff(&mut self) -> Result<()>;

    async fn land(&mut self) -> Result<()>;

    async fn move_up(&mut self, cm: u32) -> Result<()>;

    async fn move_down(&mut self, cm: u32) -> Result<()>;

    async fn move_left(&mut self, cm: u32) -> Result<()>;

    async fn move_right(&mut self, cm: u32) -> Result<()>;

    /// Release the control session after landing
    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Number of physical units behind this actuator
    fn units(&self) -> usize {
        1
    }

    /// Human-readable name for logs
    fn name(&self) -> String;
}

/// Factory for vehicle actuators
#[async_trait]
pub trait Link: Send + Sync {
    /// Open an actuator for the requested mode. The returned actuator is not
    /// yet connected.
    async fn open(&self, mode: ConnectMode) -> Result<Box<dyn Actuator>>;

    /// Human-readable name for this link
    fn name(&self) -> &'static str;
}
