//! Cycle Scheduler.
//!
//! [`AutoSwitchController::spawn`] starts the controller task and returns an
//! [`AutoSwitchHandle`], the only way to drive it. Every handle method
//! resolves once the controller has applied the command.
//!
//! Submodules:
//! - `state`: tagged controller state, cycle position and the flag debounce.
//! - `signals`: outbound signals and parsing of inbound map events.
//! - `controller`: the task that owns state and timers.

mod controller;
pub mod signals;
pub mod state;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::devices::DeviceStore;
use crate::model::Device;

pub use controller::AutoSwitchController;
use controller::{Command, Envelope};
pub use signals::{AdapterErrorKind, AdapterReport, InboundEvent, Interaction, NoDataContext, Signal};
pub use state::StateKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("auto-switch controller has shut down")]
    Closed,
}

/// Read-only view of the controller, updated on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSwitchStatus {
    pub state: StateKind,
    pub current_index: usize,
    pub device_count: usize,
    pub last_adapter_error: Option<String>,
}

impl Default for AutoSwitchStatus {
    fn default() -> Self {
        Self {
            state: StateKind::Stopped,
            current_index: 0,
            device_count: 0,
            last_adapter_error: None,
        }
    }
}

/// Cloneable handle to a running controller.
#[derive(Debug, Clone)]
pub struct AutoSwitchHandle {
    commands: mpsc::Sender<Envelope>,
    signals: broadcast::Sender<Signal>,
    status: watch::Receiver<AutoSwitchStatus>,
    store: DeviceStore,
}

impl AutoSwitchHandle {
    fn new(
        commands: mpsc::Sender<Envelope>,
        signals: broadcast::Sender<Signal>,
        status: watch::Receiver<AutoSwitchStatus>,
        store: DeviceStore,
    ) -> Self {
        Self {
            commands,
            signals,
            status,
            store,
        }
    }

    async fn send(&self, command: Command) -> Result<(), ControllerError> {
        let (done, applied) = oneshot::channel();
        self.commands
            .send(Envelope { command, done })
            .await
            .map_err(|_| ControllerError::Closed)?;
        applied.await.map_err(|_| ControllerError::Closed)
    }

    /// Stopped → Playing. Focuses the current device at once, or fetches
    /// first if the list is empty. No-op in any other state.
    pub async fn start(&self) -> Result<(), ControllerError> {
        self.send(Command::Start).await
    }

    /// Playing or Paused → Stopped. Keeps the current index.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        self.send(Command::Stop).await
    }

    /// Stopped → start, Playing → stop, Paused → resume.
    pub async fn toggle(&self) -> Result<(), ControllerError> {
        self.send(Command::Toggle).await
    }

    /// Pauses for the auto-resume delay. Ignored while stopped.
    pub async fn pause(&self, reason: Interaction) -> Result<(), ControllerError> {
        self.send(Command::Pause(reason)).await
    }

    pub async fn resume(&self) -> Result<(), ControllerError> {
        self.send(Command::Resume).await
    }

    /// Sets the externally driven on/off switch. Applied after the
    /// debounce window if it still disagrees with the controller state.
    pub async fn set_external_flag(&self, on: bool) -> Result<(), ControllerError> {
        self.send(Command::SetExternalFlag(on)).await
    }

    pub async fn report(&self, report: AdapterReport) -> Result<(), ControllerError> {
        self.send(Command::Report(report)).await
    }

    /// Applies an event raised by the map view.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<(), ControllerError> {
        match event {
            InboundEvent::Interaction(reason) => self.pause(reason).await,
            InboundEvent::Resume => self.resume().await,
            InboundEvent::Report(report) => self.report(report).await,
        }
    }

    /// Starts a foreground fetch unless one is already running.
    pub async fn refresh(&self) -> Result<(), ControllerError> {
        self.send(Command::Refresh).await
    }

    /// Ends the controller task, cancelling every timer and child task.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.send(Command::Shutdown).await
    }

    /// Subscribes to outbound signals. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    pub fn status(&self) -> AutoSwitchStatus {
        self.status.borrow().clone()
    }

    pub fn devices(&self) -> Arc<[Device]> {
        self.store.devices()
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }
}
