//! Command gateway
//!
//! Many producers, one consumer: perception, the trigger server and the
//! binary all enqueue through cloned [`CommandGateway`] handles, while a
//! single [`worker::GatewayWorker`] applies commands to the flight session.

mod queue;
pub mod worker;

pub use queue::{CommandGateway, GatewayConfig};
pub use worker::{GatewayEvent, StopReason};
