//! Shared views of session state
//!
//! The gateway worker is the only writer of flight state. Other tasks read
//! published snapshots and adjust bounds through a handle.

use gesture_flight_shared::{Bounds, BoundsError, FlightPhase};
use std::sync::Arc;
use tokio::sync::watch;

/// Point-in-time copy of the flight state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightSnapshot {
    pub phase: FlightPhase,
    pub altitude: i32,
    pub bounds: Bounds,
    /// Units attached to the session (0 when disconnected)
    pub units: usize,
}

/// Handle for adjusting altitude bounds while the session runs
///
/// New bounds apply to commands authorised after the change.
#[derive(Debug, Clone)]
pub struct BoundsHandle {
    tx: Arc<watch::Sender<Bounds>>,
}

impl BoundsHandle {
    pub fn new(bounds: Bounds) -> Result<Self, BoundsError> {
        bounds.validate()?;
        let (tx, _rx) = watch::channel(bounds);
        Ok(Self { tx: Arc::new(tx) })
    }

    /// Replace the bounds; invalid bounds are refused and the old ones kept
    pub fn set(&self, bounds: Bounds) -> Result<(), BoundsError> {
        bounds.validate()?;
        self.tx.send_replace(bounds);
        Ok(())
    }

    pub fn current(&self) -> Bounds {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_handle_updates() {
        let handle = BoundsHandle::new(Bounds::default()).unwrap();
        let other = handle.clone();

        let raised = Bounds {
            max: 400,
            ..Bounds::default()
        };
        other.set(raised).unwrap();
        assert_eq!(handle.current().max, 400);
    }

    #[test]
    fn test_invalid_bounds_refused() {
        assert!(BoundsHandle::new(Bounds {
            min: 500,
            ..Bounds::default()
        })
        .is_err());

        let handle = BoundsHandle::new(Bounds::default()).unwrap();
        let result = handle.set(Bounds {
            horizontal_step: -5,
            ..Bounds::default()
        });
        assert!(result.is_err());
        assert_eq!(handle.current(), Bounds::default());
    }

    #[test]
    fn test_clones_share_bounds() {
        let handle = BoundsHandle::new(Bounds::default()).unwrap();
        let clones: Vec<BoundsHandle> = (0..3).map(|_| handle.clone()).collect();

        handle
            .set(Bounds {
                vertical_step: 30,
                ..Bounds::default()
            })
            .unwrap();
        assert!(clones.iter().all(|clone| clone.current().vertical_step == 30));
    }
}
