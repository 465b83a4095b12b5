//! Signals exchanged with the host map view.
//!
//! Outbound [`Signal`]s serialize as `{ "event": ..., "detail": { ... } }`
//! using the dashboard's event names and camelCase payload keys, so a web
//! host can re-dispatch them unchanged. Inbound events use the same
//! envelope and are parsed by [`InboundEvent::from_json`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::DeviceId;

/// What paused the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Interaction {
    MapDrag,
    MapZoom,
    MapRotate,
    MapClick,
    MapMarker,
    /// A pause requested through the handle or a generic interaction.
    Manual,
}

impl Interaction {
    /// Maps the `source` of a generic `userInteraction` event.
    pub fn from_source(source: &str) -> Self {
        match source {
            "mapDrag" => Interaction::MapDrag,
            "mapZoom" => Interaction::MapZoom,
            "mapRotate" => Interaction::MapRotate,
            "mapClick" => Interaction::MapClick,
            "mapMarker" => Interaction::MapMarker,
            _ => Interaction::Manual,
        }
    }
}

/// Where an empty device list was noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoDataContext {
    Start,
    Tick,
    Resume,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "detail")]
pub enum Signal {
    #[serde(rename = "autoSwitchActivated", rename_all = "camelCase")]
    Activated {
        active: bool,
        current_index: usize,
        device_count: usize,
    },
    #[serde(rename = "autoSwitchPaused", rename_all = "camelCase")]
    Paused {
        paused: bool,
        /// Milliseconds until the cycle resumes on its own.
        resume_in: u64,
        reason: Interaction,
    },
    #[serde(rename = "autoSwitchResumed", rename_all = "camelCase")]
    Resumed {
        resumed: bool,
        current_index: usize,
        device_count: usize,
    },
    #[serde(rename = "autoSwitchDeactivated")]
    Deactivated { active: bool },
    #[serde(rename = "autoSwitchStationChanged", rename_all = "camelCase")]
    StationChanged {
        index: usize,
        device_id: Option<DeviceId>,
        name: String,
    },
    #[serde(rename = "noDataAvailable")]
    NoDataAvailable { during: NoDataContext },
    #[serde(rename = "autoSwitchAdapterError")]
    AdapterError { error: String, retrying: bool },
    #[serde(rename = "devicesFetchFailed")]
    DevicesFetchFailed { attempts: u32, error: String },
}

impl Signal {
    /// The event name as the dashboard knows it.
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Activated { .. } => "autoSwitchActivated",
            Signal::Paused { .. } => "autoSwitchPaused",
            Signal::Resumed { .. } => "autoSwitchResumed",
            Signal::Deactivated { .. } => "autoSwitchDeactivated",
            Signal::StationChanged { .. } => "autoSwitchStationChanged",
            Signal::NoDataAvailable { .. } => "noDataAvailable",
            Signal::AdapterError { .. } => "autoSwitchAdapterError",
            Signal::DevicesFetchFailed { .. } => "devicesFetchFailed",
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Classification of an error the map view reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AdapterErrorKind {
    #[serde(rename = "map_not_ready")]
    MapNotReady,
    #[serde(other)]
    Other,
}

/// Outcome of a focus request, as reported back by the map view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterReport {
    Error { error: String, kind: AdapterErrorKind },
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Interaction(Interaction),
    Resume,
    Report(AdapterReport),
}

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    detail: Value,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    error: String,
    #[serde(rename = "type", default = "other_kind")]
    kind: AdapterErrorKind,
}

fn other_kind() -> AdapterErrorKind {
    AdapterErrorKind::Other
}

#[derive(Deserialize)]
struct InteractionDetail {
    #[serde(default)]
    source: String,
}

impl InboundEvent {
    /// Parses one `{ "event": ..., "detail": ... }` message.
    ///
    /// Fields of `detail` the controller does not use are ignored.
    pub fn from_json(text: &str) -> Result<Self, InboundError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let event = match envelope.event.as_str() {
            "autoSwitchError" => {
                let detail: ErrorDetail = serde_json::from_value(envelope.detail)?;
                InboundEvent::Report(AdapterReport::Error {
                    error: detail.error,
                    kind: detail.kind,
                })
            }
            "autoSwitchSuccess" => InboundEvent::Report(AdapterReport::Success),
            "userInteraction" => {
                let source = if envelope.detail.is_null() {
                    String::new()
                } else {
                    serde_json::from_value::<InteractionDetail>(envelope.detail)?.source
                };
                InboundEvent::Interaction(Interaction::from_source(&source))
            }
            "pauseAutoSwitch" => InboundEvent::Interaction(Interaction::Manual),
            "resumeAutoSwitch" => InboundEvent::Resume,
            "mapDrag" | "mapZoom" | "mapRotate" | "mapClick" | "mapMarker" => {
                InboundEvent::Interaction(Interaction::from_source(&envelope.event))
            }
            other => return Err(InboundError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}
