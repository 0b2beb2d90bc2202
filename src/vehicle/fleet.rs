//! Fleet actuator - drives several units as one

use super::traits::Actuator;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

/// Runs every call on all units concurrently; fails if any unit fails
pub struct FleetActuator {
    units: Vec<Box<dyn Actuator>>,
}

impl FleetActuator {
    pub fn new(units: Vec<Box<dyn Actuator>>) -> Self {
        Self { units }
    }
}

#[async_trait]
impl Actuator for FleetActuator {
    async fn connect(&mut self) -> Result<()> {
        if self.units.is_empty() {
            return Err(anyhow!("Fleet has no units"));
        }
        debug!("[FLEET] Connecting {} units", self.units.len());
        try_join_all(self.units.iter_mut().map(|unit| unit.connect()))
            .await
            .context("fleet connect")?;
        Ok(())
    }

    async fn takeoff(&mut self) -> Result<()> {
        try_join_all(self.units.iter_mut().map(|unit| unit.takeoff())).await?;
        Ok(())
    }

    async fn land(&mut self) -> Result<()> {
        try_join_all(self.units.iter_mut().map(|unit| unit.land())).await?;
        Ok(())
    }

    async fn move_up(&mut self, cm: u32) -> Result<()> {
        try_join_all(self.units.iter_mut().map(|unit| unit.move_up(cm))).await?;
        Ok(())
    }

    async fn move_down(&mut self, cm: u32) -> Result<()> {
        try_join_all(self.units.iter_mut().map(|unit| unit.move_down(cm))).await?;
        Ok(())
    }

    async fn move_left(&mut self, cm: u32) -> Result<()> {
        try_join_all(self.units.iter_mut().map(|unit| unit.move_left(cm))).await?;
        Ok(())
    }

    async fn move_right(&mut self, cm: u32) -> Result<()> {
        try_join_all(self.units.iter_mut().map(|unit| unit.move_right(cm))).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        try_join_all(self.units.iter_mut().map(|unit| unit.disconnect())).await?;
        Ok(())
    }

    fn units(&self) -> usize {
        self.units.len()
    }

    fn name(&self) -> String {
        format!("fleet[{}]", self.units.len())
    }
}
