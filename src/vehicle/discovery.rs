//! Network discovery of fleet units on the local subnet

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use gesture_flight_shared::defaults;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Source of reachable unit addresses
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<SocketAddr>>;
}

/// Configuration for subnet port scanning
#[derive(Debug, Clone)]
pub struct PortScanConfig {
    /// First three octets of the /24 to scan; the last octet is ignored
    pub subnet: Ipv4Addr,
    /// Port a unit listens on
    pub port: u16,
    /// How long to wait for each probe
    pub probe_timeout: Duration,
    /// Probes in flight at once
    pub concurrency: usize,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            subnet: Ipv4Addr::new(192, 168, 35, 0),
            port: defaults::FLEET_CONTROL_PORT,
            probe_timeout: Duration::from_millis(100),
            concurrency: 32,
        }
    }
}

/// Finds units by probing every host of a /24 subnet with a TCP connect
pub struct PortScanDiscovery {
    config: PortScanConfig,
}

impl PortScanDiscovery {
    pub fn new(config: PortScanConfig) -> Self {
        Self { config }
    }

    /// Candidate addresses `x.y.z.1 ..= x.y.z.254`
    fn candidates(&self) -> Vec<SocketAddr> {
        let [a, b, c, _] = self.config.subnet.octets();
        (1..=254u8)
            .map(|host| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, host), self.config.port)))
            .collect()
    }

    async fn probe(addr: SocketAddr, probe_timeout: Duration) -> Option<SocketAddr> {
        match timeout(probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                debug!("[DISCOVERY] {} is open", addr);
                Some(addr)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Discovery for PortScanDiscovery {
    async fn discover(&self) -> Result<Vec<SocketAddr>> {
        if self.config.concurrency == 0 {
            return Err(anyhow!("Scan concurrency must be at least 1"));
        }

        info!(
            "[DISCOVERY] Scanning {}/24 on port {}",
            self.config.subnet, self.config.port
        );

        let probe_timeout = self.config.probe_timeout;
        let mut found: Vec<SocketAddr> = futures::stream::iter(self.candidates())
            .map(|addr| Self::probe(addr, probe_timeout))
            .buffer_unordered(self.config.concurrency)
            .filter_map(|addr| async move { addr })
            .collect()
            .await;

        found.sort();
        info!("[DISCOVERY] Found {} units", found.len());
        Ok(found)
    }
}

/// Fixed address list, for deployments where units are known up front
pub struct StaticDiscovery {
    addresses: Vec<SocketAddr>,
}

impl StaticDiscovery {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.addresses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_config() {
        let config = PortScanConfig::default();
        assert_eq!(config.port, 8889);
        assert_eq!(config.probe_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_candidates_cover_subnet() {
        let scan = PortScanDiscovery::new(PortScanConfig {
            subnet: Ipv4Addr::new(10, 0, 7, 99),
            ..Default::default()
        });
        let candidates = scan.candidates();
        assert_eq!(candidates.len(), 254);
        assert_eq!(candidates[0], "10.0.7.1:8889".parse().unwrap());
        assert_eq!(candidates[253], "10.0.7.254:8889".parse().unwrap());
    }

    #[tokio::test]
    async fn test_finds_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let scan = PortScanDiscovery::new(PortScanConfig {
            subnet: Ipv4Addr::new(127, 0, 0, 0),
            port,
            probe_timeout: Duration::from_millis(200),
            concurrency: 64,
        });
        let found = scan.discover().await.unwrap();
        assert!(found.contains(&SocketAddr::from(([127, 0, 0, 1], port))));
    }

    #[tokio::test]
    async fn test_static_discovery() {
        let addr: SocketAddr = "192.168.35.10:8889".parse().unwrap();
        let discovery = StaticDiscovery::new(vec![addr]);
        assert_eq!(discovery.discover().await.unwrap(), vec![addr]);
    }
}
