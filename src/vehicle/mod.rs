//! Vehicle boundary
//!
//! Everything the flight session needs from the outside world:
//! - The `Actuator` movement primitives and the `Link` that opens them
//! - Fleet fan-out over several units
//! - Subnet discovery for fleet mode
//! - MAVLink and simulated backends

pub mod discovery;
pub mod fleet;
pub mod mav;
pub mod sim;
pub mod traits;

pub use discovery::{Discovery, PortScanConfig, PortScanDiscovery, StaticDiscovery};
pub use mav::{MavlinkConfig, MavlinkLink};
pub use sim::SimLink;
pub use traits::{Actuator, Link};
