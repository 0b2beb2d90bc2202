//! Simulated vehicle
//!
//! In-process stand-in for real units. Records every actuator call so the
//! dry-run mode can be followed in the log and tests can assert on exactly
//! what reached the vehicle.

use super::fleet::FleetActuator;
use super::traits::{Actuator, Link};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gesture_flight_shared::ConnectMode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// One actuator primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    Connect,
    TakeOff,
    Land,
    MoveUp(u32),
    MoveDown(u32),
    MoveLeft(u32),
    MoveRight(u32),
    Disconnect,
}

impl SimOp {
    pub fn name(&self) -> &'static str {
        match self {
            SimOp::Connect => "connect",
            SimOp::TakeOff => "takeoff",
            SimOp::Land => "land",
            SimOp::MoveUp(_) => "move_up",
            SimOp::MoveDown(_) => "move_down",
            SimOp::MoveLeft(_) => "move_left",
            SimOp::MoveRight(_) => "move_right",
            SimOp::Disconnect => "disconnect",
        }
    }
}

/// A call that reached a simulated unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCall {
    pub unit: usize,
    pub op: SimOp,
}

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<SimCall>,
    /// Name of the next operation that should fail
    fail_next: Option<String>,
}

/// Link that opens simulated units
#[derive(Clone)]
pub struct SimLink {
    fleet_size: usize,
    latency: Duration,
    journal: Arc<Mutex<Journal>>,
}

impl SimLink {
    /// Single unit, fleet of three
    pub fn new() -> Self {
        Self::with_fleet_size(3)
    }

    pub fn with_fleet_size(fleet_size: usize) -> Self {
        Self {
            fleet_size,
            latency: Duration::ZERO,
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    /// Delay every actuator call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every call recorded so far, in order
    pub async fn calls(&self) -> Vec<SimCall> {
        self.journal.lock().await.calls.clone()
    }

    /// Make the next call of operation `op` (see [`SimOp::name`]) fail
    #[cfg(test)]
    pub async fn fail_next(&self, op: &str) {
        self.journal.lock().await.fail_next = Some(op.to_string());
    }

    fn unit(&self, unit: usize) -> SimActuator {
        SimActuator {
            unit,
            latency: self.latency,
            journal: self.journal.clone(),
        }
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Link for SimLink {
    async fn open(&self, mode: ConnectMode) -> Result<Box<dyn Actuator>> {
        match mode {
            ConnectMode::Single => Ok(Box::new(self.unit(0))),
            ConnectMode::Fleet => {
                if self.fleet_size == 0 {
                    return Err(anyhow!("No simulated units available"));
                }
                let units = (0..self.fleet_size)
                    .map(|unit| Box::new(self.unit(unit)) as Box<dyn Actuator>)
                    .collect();
                Ok(Box::new(FleetActuator::new(units)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "simulator"
    }
}

/// One simulated unit
pub struct SimActuator {
    unit: usize,
    latency: Duration,
    journal: Arc<Mutex<Journal>>,
}

impl SimActuator {
    async fn perform(&self, op: SimOp) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut journal = self.journal.lock().await;
        if journal.fail_next.as_deref() == Some(op.name()) {
            journal.fail_next = None;
            return Err(anyhow!("Simulated failure in {} on unit {}", op.name(), self.unit));
        }

        journal.calls.push(SimCall { unit: self.unit, op });
        info!("[SIM] unit {}: {:?}", self.unit, op);
        Ok(())
    }
}

#[async_trait]
impl Actuator for SimActuator {
    async fn connect(&mut self) -> Result<()> {
        self.perform(SimOp::Connect).await
    }

    async fn takeoff(&mut self) -> Result<()> {
        self.perform(SimOp::TakeOff).await
    }

    async fn land(&mut self) -> Result<()> {
        self.perform(SimOp::Land).await
    }

    async fn move_up(&mut self, cm: u32) -> Result<()> {
        self.perform(SimOp::MoveUp(cm)).await
    }

    async fn move_down(&mut self, cm: u32) -> Result<()> {
        self.perform(SimOp::MoveDown(cm)).await
    }

    async fn move_left(&mut self, cm: u32) -> Result<()> {
        self.perform(SimOp::MoveLeft(cm)).await
    }

    async fn move_right(&mut self, cm: u32) -> Result<()> {
        self.perform(SimOp::MoveRight(cm)).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.perform(SimOp::Disconnect).await
    }

    fn name(&self) -> String {
        format!("sim-{}", self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_are_journaled() {
        let link = SimLink::new();
        let mut unit = link.open(ConnectMode::Single).await.unwrap();
        unit.connect().await.unwrap();
        unit.move_up(20).await.unwrap();

        assert_eq!(
            link.calls().await,
            vec![
                SimCall { unit: 0, op: SimOp::Connect },
                SimCall { unit: 0, op: SimOp::MoveUp(20) },
            ]
        );
        assert_eq!(unit.name(), "sim-0");
    }

    #[tokio::test]
    async fn test_fault_is_one_shot() {
        let link = SimLink::new();
        let mut unit = link.open(ConnectMode::Single).await.unwrap();

        link.fail_next("land").await;
        unit.move_down(20).await.unwrap();
        assert!(unit.land().await.is_err());
        unit.land().await.unwrap();

        let calls = link.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].op, SimOp::Land);
    }

    #[tokio::test]
    async fn test_empty_fleet_cannot_open() {
        let link = SimLink::with_fleet_size(0);
        assert!(link.open(ConnectMode::Fleet).await.is_err());
        assert!(link.open(ConnectMode::Single).await.is_ok());
    }
}
