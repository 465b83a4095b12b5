//! Sink Adapter: where "focus on this station" goes.
//!
//! The controller never talks to a map directly. Hosts implement
//! [`FocusSink`] (a map widget, a websocket push, a kiosk display) and the
//! controller calls it once per tick with the device and its position.

use thiserror::Error;

use crate::logging::{self, Component};
use crate::model::Device;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The map cannot take a focus request yet; the controller restarts the
    /// cycle after a delay instead of retrying this one call.
    #[error("map not ready")]
    NotReady,
    #[error("focus transition failed: {0}")]
    Transition(String),
}

/// Receives focus requests from the scheduler.
///
/// Implementations must return quickly; slow work belongs on the sink's
/// own task. Called from the controller task only, never concurrently.
pub trait FocusSink: Send + Sync {
    fn focus_on(&self, device: &Device, index: usize) -> Result<(), SinkError>;
}

/// Sink that only logs the requests. Used by the CLI when no map is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FocusSink for TracingSink {
    fn focus_on(&self, device: &Device, index: usize) -> Result<(), SinkError> {
        let id = device.id.as_ref().map(ToString::to_string);
        logging::info(
            Component::Sink,
            id.as_deref(),
            &format!(
                "Focus #{} {} at ({:.5}, {:.5})",
                index, device.name, device.coordinates.latitude, device.coordinates.longitude
            ),
        );
        Ok(())
    }
}
