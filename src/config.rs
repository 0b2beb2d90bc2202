//! Application configuration
//!
//! Every component keeps its own config struct with sensible defaults;
//! `AppConfig` gathers them and applies `GESTURE_FLIGHT_*` overrides.

use crate::gateway::GatewayConfig;
use crate::session::SessionConfig;
use crate::vehicle::{MavlinkConfig, PortScanConfig};
use anyhow::{bail, Context};
use gesture_flight_shared::{defaults, Bounds, ConnectMode};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "GESTURE_FLIGHT_";

/// Which vehicle backend to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VehicleMode {
    /// In-process simulated vehicle
    #[default]
    Sim,
    /// MAVLink companion link
    Mavlink,
}

impl FromStr for VehicleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" => Ok(VehicleMode::Sim),
            "mavlink" => Ok(VehicleMode::Mavlink),
            other => bail!("Unknown vehicle mode '{}' (expected sim or mavlink)", other),
        }
    }
}

impl fmt::Display for VehicleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleMode::Sim => f.write_str("sim"),
            VehicleMode::Mavlink => f.write_str("mavlink"),
        }
    }
}

/// `single`, `swarm`, or `none` for perception-only runs
fn parse_connect(s: &str) -> anyhow::Result<Option<ConnectMode>> {
    match s.trim().to_ascii_lowercase().as_str() {
        "single" => Ok(Some(ConnectMode::Single)),
        "swarm" | "fleet" => Ok(Some(ConnectMode::Fleet)),
        "none" => Ok(None),
        other => bail!("Unknown connect mode '{}' (expected single, swarm or none)", other),
    }
}

fn parse_bool(s: &str) -> anyhow::Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("Expected a boolean, got '{}'", other),
    }
}

/// Full runtime configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub vehicle: VehicleMode,
    /// Connect issued at startup; `None` runs perception only
    pub connect: Option<ConnectMode>,
    pub vote_window: usize,
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub bounds: Bounds,
    pub mavlink: MavlinkConfig,
    pub scan: PortScanConfig,
    /// Units opened by a simulated swarm connect
    pub sim_fleet_size: usize,
    /// Delay added to every simulated actuator call
    pub sim_latency: Duration,
    /// Known fleet addresses; the subnet scan runs when empty
    pub fleet_addrs: Vec<SocketAddr>,
    /// Trigger server address; disabled when `None`
    pub trigger_addr: Option<SocketAddr>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vehicle: VehicleMode::default(),
            connect: Some(ConnectMode::Single),
            vote_window: defaults::VOTE_WINDOW,
            gateway: GatewayConfig::default(),
            session: SessionConfig::default(),
            bounds: Bounds::default(),
            mavlink: MavlinkConfig::default(),
            scan: PortScanConfig::default(),
            sim_fleet_size: 3,
            sim_latency: Duration::ZERO,
            fleet_addrs: Vec::new(),
            trigger_addr: None,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup(GESTURE_FLIGHT_<NAME>)`
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(v) = get("VEHICLE") {
            config.vehicle = v.parse()?;
        }
        if let Some(v) = get("CONNECT") {
            config.connect = parse_connect(&v)?;
        }
        if let Some(v) = get("VOTE_WINDOW") {
            config.vote_window = parse_number(&v, "VOTE_WINDOW")?;
        }
        if let Some(v) = get("STALE_MS") {
            config.gateway.stale_threshold =
                Duration::from_millis(parse_number(&v, "STALE_MS")?);
        }
        if let Some(v) = get("MIN_ALT") {
            config.bounds.min = parse_number(&v, "MIN_ALT")?;
        }
        if let Some(v) = get("MAX_ALT") {
            config.bounds.max = parse_number(&v, "MAX_ALT")?;
        }
        if let Some(v) = get("VERTICAL_STEP") {
            config.bounds.vertical_step = parse_number(&v, "VERTICAL_STEP")?;
        }
        if let Some(v) = get("HORIZONTAL_STEP") {
            config.bounds.horizontal_step = parse_number(&v, "HORIZONTAL_STEP")?;
        }
        if let Some(v) = get("TAKEOFF_ALT") {
            config.session.takeoff_altitude = parse_number(&v, "TAKEOFF_ALT")?;
        }
        if let Some(v) = get("AUTO_TAKEOFF") {
            config.session.auto_takeoff =
                parse_bool(&v).with_context(|| format!("Invalid {}AUTO_TAKEOFF", ENV_PREFIX))?;
        }
        if let Some(v) = get("MAVLINK_ADDR") {
            config.mavlink.address = v;
        }
        if let Some(v) = get("SCAN_SUBNET") {
            config.scan.subnet = parse_number::<Ipv4Addr>(&v, "SCAN_SUBNET")?;
        }
        if let Some(v) = get("SCAN_PORT") {
            config.scan.port = parse_number(&v, "SCAN_PORT")?;
        }
        if let Some(v) = get("SIM_FLEET") {
            config.sim_fleet_size = parse_number(&v, "SIM_FLEET")?;
        }
        if let Some(v) = get("SIM_LATENCY_MS") {
            config.sim_latency = Duration::from_millis(parse_number(&v, "SIM_LATENCY_MS")?);
        }
        if let Some(v) = get("FLEET_ADDRS") {
            config.fleet_addrs = v
                .split(',')
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
                .map(|addr| parse_number(addr, "FLEET_ADDRS"))
                .collect::<anyhow::Result<_>>()?;
        }
        if let Some(v) = get("TRIGGER_ADDR") {
            config.trigger_addr = match v.trim() {
                "" | "off" => None,
                addr => Some(parse_number(addr, "TRIGGER_ADDR")?),
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.bounds.validate().context("Invalid altitude bounds")?;
        if self.vote_window == 0 {
            bail!("Vote window must be at least 1");
        }
        if self.gateway.poll_interval.is_zero() {
            bail!("Gateway poll interval must be non-zero");
        }
        Ok(())
    }
}

fn parse_number<T>(value: &str, name: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}{}: '{}'", ENV_PREFIX, name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.vehicle, VehicleMode::Sim);
        assert_eq!(config.connect, Some(ConnectMode::Single));
        assert_eq!(config.vote_window, 10);
        assert_eq!(config.gateway.stale_threshold, Duration::from_secs(1));
        assert_eq!(config.bounds, Bounds::default());
        assert!(config.session.auto_takeoff);
        assert_eq!(config.trigger_addr, None);
        assert_eq!(config.sim_latency, Duration::ZERO);
        assert!(config.fleet_addrs.is_empty());
    }

    #[test]
    fn test_fleet_addresses_and_latency() {
        let config = from_pairs(&[
            ("FLEET_ADDRS", "192.168.35.10:8889, 192.168.35.11:8889,"),
            ("SIM_LATENCY_MS", "40"),
        ])
        .unwrap();
        assert_eq!(
            config.fleet_addrs,
            vec![
                "192.168.35.10:8889".parse::<SocketAddr>().unwrap(),
                "192.168.35.11:8889".parse().unwrap(),
            ]
        );
        assert_eq!(config.sim_latency, Duration::from_millis(40));

        let err = from_pairs(&[("FLEET_ADDRS", "192.168.35.10")]).unwrap_err();
        assert!(err.to_string().contains("GESTURE_FLIGHT_FLEET_ADDRS"));
        assert!(from_pairs(&[("SIM_LATENCY_MS", "-1")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("VEHICLE", "MAVLink"),
            ("CONNECT", "swarm"),
            ("VOTE_WINDOW", "5"),
            ("STALE_MS", "250"),
            ("MAX_ALT", "300"),
            ("AUTO_TAKEOFF", "no"),
            ("MAVLINK_ADDR", "tcpout:10.0.0.2:5760"),
            ("SCAN_SUBNET", "10.0.0.0"),
            ("TRIGGER_ADDR", "127.0.0.1:8080"),
        ])
        .unwrap();

        assert_eq!(config.vehicle, VehicleMode::Mavlink);
        assert_eq!(config.connect, Some(ConnectMode::Fleet));
        assert_eq!(config.vote_window, 5);
        assert_eq!(config.gateway.stale_threshold, Duration::from_millis(250));
        assert_eq!(config.bounds.max, 300);
        assert!(!config.session.auto_takeoff);
        assert_eq!(config.mavlink.address, "tcpout:10.0.0.2:5760");
        assert_eq!(config.scan.subnet, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(config.trigger_addr, Some("127.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn test_perception_only() {
        let config = from_pairs(&[("CONNECT", "none")]).unwrap();
        assert_eq!(config.connect, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(from_pairs(&[("VEHICLE", "tello")]).is_err());
        assert!(from_pairs(&[("VOTE_WINDOW", "0")]).is_err());
        assert!(from_pairs(&[("VOTE_WINDOW", "ten")]).is_err());
        assert!(from_pairs(&[("MIN_ALT", "400")]).is_err());
        assert!(from_pairs(&[("VERTICAL_STEP", "-5")]).is_err());

        let err = from_pairs(&[("SCAN_PORT", "99999")]).unwrap_err();
        assert!(err.to_string().contains("GESTURE_FLIGHT_SCAN_PORT"));
    }
}
