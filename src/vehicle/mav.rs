//! MAVLink vehicle link
//!
//! Drives ArduPilot-compatible units from a companion computer. Commands
//! sent as COMMAND_LONG wait for the matching COMMAND_ACK; relative moves are
//! body-frame position offsets followed by a settle delay.

use super::discovery::Discovery;
use super::fleet::FleetActuator;
use super::traits::{Actuator, Link};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use gesture_flight_shared::ConnectMode;
use mavlink::ardupilotmega::{
    MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
    PositionTargetTypemask, COMMAND_ACK_DATA, COMMAND_LONG_DATA, HEARTBEAT_DATA,
    SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use mavlink::{AsyncMavConnection, MavHeader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

type SharedConnection = Arc<dyn AsyncMavConnection<MavMessage> + Send + Sync>;

/// ArduPilot Copter GUIDED mode number
const GUIDED_MODE: f32 = 4.0;

/// Use x/y/z position only, ignore velocity, acceleration and yaw
const POSITION_ONLY_MASK: u16 = 0x0FF8;

/// Configuration for a MAVLink unit
#[derive(Debug, Clone)]
pub struct MavlinkConfig {
    /// Connection string for the single unit (e.g. "udpout:127.0.0.1:14550")
    pub address: String,
    /// Scheme used for discovered fleet units ("udpout", "tcpout")
    pub fleet_scheme: String,
    /// System ID for this companion computer
    pub system_id: u8,
    /// Component ID for this companion computer
    pub component_id: u8,
    /// Target system ID (flight controller)
    pub target_system: u8,
    /// Target component ID (autopilot)
    pub target_component: u8,
    /// Take-off altitude in metres
    pub takeoff_altitude_m: f32,
    /// How long to wait for the first vehicle heartbeat
    pub heartbeat_timeout: Duration,
    /// How long to wait for a COMMAND_ACK
    pub ack_timeout: Duration,
    /// Time allowed for a relative move to complete
    pub move_settle: Duration,
}

impl Default for MavlinkConfig {
    fn default() -> Self {
        Self {
            address: "udpout:127.0.0.1:14550".into(), // SITL default
            fleet_scheme: "udpout".into(),
            system_id: 255,      // Companion computer
            component_id: 190,   // MAV_COMP_ID_ONBOARD_COMPUTER
            target_system: 1,    // Autopilot
            target_component: 1, // MAV_COMP_ID_AUTOPILOT1
            takeoff_altitude_m: 1.0,
            heartbeat_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(3),
            move_settle: Duration::from_secs(1),
        }
    }
}

/// Opens MAVLink units; fleet units come from discovery
pub struct MavlinkLink {
    config: MavlinkConfig,
    discovery: Box<dyn Discovery>,
}

impl MavlinkLink {
    pub fn new(config: MavlinkConfig, discovery: Box<dyn Discovery>) -> Self {
        Self { config, discovery }
    }
}

#[async_trait]
impl Link for MavlinkLink {
    async fn open(&self, mode: ConnectMode) -> Result<Box<dyn Actuator>> {
        match mode {
            ConnectMode::Single => Ok(Box::new(MavlinkActuator::new(self.config.clone()))),
            ConnectMode::Fleet => {
                let addresses = self.discovery.discover().await.context("fleet discovery")?;
                if addresses.is_empty() {
                    return Err(anyhow!("No fleet units discovered"));
                }

                let units = addresses
                    .into_iter()
                    .map(|addr| {
                        let config = MavlinkConfig {
                            address: format!("{}:{}", self.config.fleet_scheme, addr),
                            ..self.config.clone()
                        };
                        Box::new(MavlinkActuator::new(config)) as Box<dyn Actuator>
                    })
                    .collect();
                Ok(Box::new(FleetActuator::new(units)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "mavlink"
    }
}

/// Messages forwarded by the reader task
#[derive(Debug)]
enum Inbound {
    Heartbeat,
    Ack(COMMAND_ACK_DATA),
    Lost(String),
}

/// One MAVLink unit
pub struct MavlinkActuator {
    config: MavlinkConfig,
    connection: Option<SharedConnection>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
    reader: Option<JoinHandle<()>>,
}

impl MavlinkActuator {
    pub fn new(config: MavlinkConfig) -> Self {
        Self {
            config,
            connection: None,
            inbound: None,
            reader: None,
        }
    }

    /// Stop the reader and drop the connection. Returns whether one was open.
    fn release(&mut self) -> bool {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.inbound = None;
        self.connection.take().is_some()
    }

    fn header(&self) -> MavHeader {
        MavHeader {
            system_id: self.config.system_id,
            component_id: self.config.component_id,
            sequence: 0,
        }
    }

    async fn send(&self, msg: &MavMessage) -> Result<()> {
        let conn = self
            .connection
            .as_ref()
            .ok_or_else(|| anyhow!("{} is not connected", self.config.address))?;
        conn.send(&self.header(), msg)
            .await
            .map_err(|e| anyhow!("Send to {} failed: {}", self.config.address, e))?;
        Ok(())
    }

    fn gcs_heartbeat() -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        })
    }

    /// Wait for the next inbound message matching `accept`
    async fn wait_for<T>(
        &mut self,
        limit: Duration,
        what: &str,
        mut accept: impl FnMut(Inbound) -> Option<Result<T>>,
    ) -> Result<T> {
        let address = self.config.address.clone();
        let inbound = self
            .inbound
            .as_mut()
            .ok_or_else(|| anyhow!("{} is not connected", address))?;

        let deadline = Instant::now() + limit;
        loop {
            let msg = match timeout(deadline.saturating_duration_since(Instant::now()), inbound.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => return Err(anyhow!("{}: reader stopped", address)),
                Err(_) => return Err(anyhow!("{}: timed out waiting for {}", address, what)),
            };
            if let Inbound::Lost(reason) = &msg {
                return Err(anyhow!("{}: link lost: {}", address, reason));
            }
            if let Some(result) = accept(msg) {
                return result;
            }
        }
    }

    /// Announce ourselves and wait for the vehicle heartbeat
    async fn handshake(&mut self) -> Result<()> {
        // udpout peers only learn our address once we have sent something
        self.send(&Self::gcs_heartbeat()).await?;

        let limit = self.config.heartbeat_timeout;
        self.wait_for(limit, "heartbeat", |inbound| match inbound {
            Inbound::Heartbeat => Some(Ok(())),
            _ => None,
        })
        .await
    }

    /// Send a COMMAND_LONG and wait for it to be accepted
    async fn command_long(&mut self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        debug!("[MAVLink] {} <- {:?}", self.config.address, command);

        let msg = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.config.target_system,
            target_component: self.config.target_component,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        });
        self.send(&msg).await?;

        let limit = self.config.ack_timeout;
        self.wait_for(limit, "COMMAND_ACK", |inbound| match inbound {
            Inbound::Ack(ack) if ack.command == command => Some(if ack.result == MavResult::MAV_RESULT_ACCEPTED {
                Ok(())
            } else {
                Err(anyhow!("{:?} refused: {:?}", command, ack.result))
            }),
            _ => None,
        })
        .await
    }

    /// Body-frame position offset in metres (NED: +x forward, +y right, +z down)
    async fn offset(&mut self, x: f32, y: f32, z: f32) -> Result<()> {
        debug!(
            "[MAVLink] {} offset x={:.2} y={:.2} z={:.2}",
            self.config.address, x, y, z
        );

        let msg = MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: 0,
            x,
            y,
            z,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
            type_mask: PositionTargetTypemask::from_bits_truncate(POSITION_ONLY_MASK),
            target_system: self.config.target_system,
            target_component: self.config.target_component,
            coordinate_frame: MavFrame::MAV_FRAME_BODY_OFFSET_NED,
        });
        self.send(&msg).await?;

        tokio::time::sleep(self.config.move_settle).await;
        Ok(())
    }
}

/// Forwards heartbeats and acks until the receiver is gone or the task is aborted
async fn read_loop(conn: SharedConnection, tx: mpsc::UnboundedSender<Inbound>) {
    loop {
        let inbound = match conn.recv().await {
            Ok((_header, MavMessage::HEARTBEAT(_))) => Inbound::Heartbeat,
            Ok((_header, MavMessage::COMMAND_ACK(ack))) => Inbound::Ack(ack),
            Ok(_) => continue,
            Err(e) => {
                let _ = tx.send(Inbound::Lost(e.to_string()));
                return;
            }
        };
        if tx.send(inbound).is_err() {
            return;
        }
    }
}

#[async_trait]
impl Actuator for MavlinkActuator {
    async fn connect(&mut self) -> Result<()> {
        info!("[MAVLink] Connecting to {}", self.config.address);
        self.release();

        let conn = mavlink::connect_async::<MavMessage>(&self.config.address)
            .await
            .with_context(|| format!("open {}", self.config.address))?;
        let conn: SharedConnection = Arc::from(conn);

        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(read_loop(conn.clone(), tx)));
        self.connection = Some(conn);
        self.inbound = Some(rx);

        if let Err(e) = self.handshake().await {
            self.release();
            return Err(e);
        }

        info!("[MAVLink] Connected to {}", self.config.address);
        Ok(())
    }

    async fn takeoff(&mut self) -> Result<()> {
        info!("[MAVLink] Take-off to {}m", self.config.takeoff_altitude_m);

        // MAV_MODE_FLAG_CUSTOM_MODE_ENABLED + GUIDED
        self.command_long(MavCmd::MAV_CMD_DO_SET_MODE, [1.0, GUIDED_MODE, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await?;
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await?;
        let altitude = self.config.takeoff_altitude_m;
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, altitude],
        )
        .await
    }

    async fn land(&mut self) -> Result<()> {
        info!("[MAVLink] Landing {}", self.config.address);
        self.command_long(
            MavCmd::MAV_CMD_NAV_LAND,
            [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, 0.0],
        )
        .await
    }

    async fn move_up(&mut self, cm: u32) -> Result<()> {
        self.offset(0.0, 0.0, -(cm as f32) / 100.0).await
    }

    async fn move_down(&mut self, cm: u32) -> Result<()> {
        self.offset(0.0, 0.0, cm as f32 / 100.0).await
    }

    async fn move_left(&mut self, cm: u32) -> Result<()> {
        self.offset(0.0, -(cm as f32) / 100.0, 0.0).await
    }

    async fn move_right(&mut self, cm: u32) -> Result<()> {
        self.offset(0.0, cm as f32 / 100.0, 0.0).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.release() {
            info!("[MAVLink] Released {}", self.config.address);
        } else {
            warn!("[MAVLink] {} was not connected", self.config.address);
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.config.address.clone()
    }
}

impl Drop for MavlinkActuator {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::discovery::StaticDiscovery;
    use std::sync::Weak;
    use tokio::net::UdpSocket;

    #[test]
    fn test_default_config() {
        let config = MavlinkConfig::default();
        assert_eq!(config.system_id, 255);
        assert_eq!(config.target_system, 1);
        assert_eq!(config.address, "udpout:127.0.0.1:14550");
    }

    #[tokio::test]
    async fn test_fleet_uses_discovered_addresses() {
        let discovery = StaticDiscovery::new(vec![
            "192.168.35.11:8889".parse().unwrap(),
            "192.168.35.12:8889".parse().unwrap(),
        ]);
        let link = MavlinkLink::new(MavlinkConfig::default(), Box::new(discovery));

        let fleet = link.open(ConnectMode::Fleet).await.unwrap();
        assert_eq!(fleet.units(), 2);
        assert_eq!(fleet.name(), "fleet[2]");
    }

    #[tokio::test]
    async fn test_fleet_requires_units() {
        let link = MavlinkLink::new(MavlinkConfig::default(), Box::new(StaticDiscovery::new(Vec::new())));
        assert!(link.open(ConnectMode::Fleet).await.is_err());
    }

    #[tokio::test]
    async fn test_moves_require_connection() {
        let mut unit = MavlinkActuator::new(MavlinkConfig::default());
        assert!(unit.move_up(20).await.is_err());
        assert!(unit.land().await.is_err());
    }

    /// Answers the first GCS heartbeat, then goes silent
    async fn quiet_vehicle() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = format!("udpout:{}", socket.local_addr().unwrap());
        (socket, address)
    }

    async fn answer_heartbeat(socket: &UdpSocket) {
        let mut buf = [0u8; 512];
        let (_len, peer) = socket.recv_from(&mut buf).await.unwrap();

        let mut reply = Vec::new();
        let header = MavHeader {
            system_id: 1,
            component_id: 1,
            sequence: 0,
        };
        mavlink::write_v2_msg(&mut reply, header, &MavlinkActuator::gcs_heartbeat()).unwrap();
        socket.send_to(&reply, peer).await.unwrap();
    }

    async fn wait_released(conn: Weak<dyn AsyncMavConnection<MavMessage> + Send + Sync>) {
        timeout(Duration::from_secs(2), async {
            while conn.strong_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reader still holds the connection");
    }

    #[tokio::test]
    async fn test_disconnect_stops_reader_when_vehicle_is_silent() {
        let (vehicle, address) = quiet_vehicle().await;
        let mut unit = MavlinkActuator::new(MavlinkConfig {
            address,
            ..MavlinkConfig::default()
        });

        let (connected, ()) = tokio::join!(unit.connect(), answer_heartbeat(&vehicle));
        connected.unwrap();
        let conn = Arc::downgrade(unit.connection.as_ref().unwrap());

        unit.disconnect().await.unwrap();
        assert!(unit.reader.is_none());
        wait_released(conn).await;
    }

    #[tokio::test]
    async fn test_failed_handshake_stops_reader() {
        let (_vehicle, address) = quiet_vehicle().await;
        let mut unit = MavlinkActuator::new(MavlinkConfig {
            address,
            heartbeat_timeout: Duration::from_millis(100),
            ..MavlinkConfig::default()
        });

        let err = unit.connect().await.unwrap_err();
        assert!(err.to_string().contains("timed out waiting for heartbeat"));
        assert!(unit.reader.is_none());
        assert!(unit.connection.is_none());
    }

    #[tokio::test]
    async fn test_drop_stops_reader() {
        let (vehicle, address) = quiet_vehicle().await;
        let mut unit = MavlinkActuator::new(MavlinkConfig {
            address,
            ..MavlinkConfig::default()
        });

        let (connected, ()) = tokio::join!(unit.connect(), answer_heartbeat(&vehicle));
        connected.unwrap();
        let conn = Arc::downgrade(unit.connection.as_ref().unwrap());

        drop(unit);
        wait_released(conn).await;
    }
}
