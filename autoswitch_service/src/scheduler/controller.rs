//! The controller task.
//!
//! One task owns the state, the cycle position and every timer deadline.
//! Fetches and adapter retries run as child tasks in `JoinSet`s owned here,
//! so ending the task (shutdown or every handle dropped) cancels all of them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::AutoSwitchConfig;
use crate::devices::{DeviceSnapshot, DeviceStore};
use crate::fetcher::{DeviceFetcher, FetchMode, FetchOutcome};
use crate::ingest::DeviceSource;
use crate::logging::{self, Component};
use crate::model::{Device, FetchError};
use crate::scheduler::signals::{AdapterErrorKind, AdapterReport, Interaction, NoDataContext, Signal};
use crate::scheduler::state::{CyclePosition, FlagDebounce, StateKind, SwitchState, next_tick_after};
use crate::scheduler::{AutoSwitchHandle, AutoSwitchStatus};
use crate::sink::{FocusSink, SinkError};

const SIGNAL_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 32;

#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Toggle,
    Pause(Interaction),
    Resume,
    SetExternalFlag(bool),
    Report(AdapterReport),
    Refresh,
    Shutdown,
}

/// A command plus the channel acknowledging it was applied.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub command: Command,
    pub done: oneshot::Sender<()>,
}

type FetchResult = (FetchMode, Result<FetchOutcome, FetchError>);

/// Spawns controllers. See [`AutoSwitchController::spawn`].
pub struct AutoSwitchController;

impl AutoSwitchController {
    /// Spawns the controller task on the current runtime.
    ///
    /// The initial foreground fetch starts immediately. If
    /// `is_auto_switch_on` is set, cycling starts once the external-flag
    /// debounce window has passed. The task ends on
    /// [`AutoSwitchHandle::shutdown`] or when every handle is dropped.
    pub fn spawn(
        config: &AutoSwitchConfig,
        source: Arc<dyn DeviceSource>,
        sink: Arc<dyn FocusSink>,
    ) -> (AutoSwitchHandle, JoinHandle<()>) {
        let store = DeviceStore::new();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (signal_tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(AutoSwitchStatus::default());

        let controller = Controller {
            config: config.clone(),
            fetcher: DeviceFetcher::new(source, config.retry_policy(), store.clone()),
            sink,
            store: store.clone(),
            state: SwitchState::Stopped,
            position: CyclePosition::default(),
            flag: FlagDebounce::new(config.sync_debounce()),
            restart_at: None,
            last_adapter_error: None,
            fetches: JoinSet::new(),
            retries: JoinSet::new(),
            signals: signal_tx.clone(),
            status: status_tx,
        };
        let task = tokio::spawn(controller.run(command_rx, store.subscribe()));

        let handle = AutoSwitchHandle::new(command_tx, signal_tx, status_rx, store);
        (handle, task)
    }
}

struct Controller {
    config: AutoSwitchConfig,
    fetcher: DeviceFetcher,
    sink: Arc<dyn FocusSink>,
    store: DeviceStore,
    state: SwitchState,
    position: CyclePosition,
    flag: FlagDebounce,
    /// Pending restart after the map reported it was not ready.
    restart_at: Option<Instant>,
    last_adapter_error: Option<String>,
    fetches: JoinSet<FetchResult>,
    retries: JoinSet<(Device, usize)>,
    signals: broadcast::Sender<Signal>,
    status: watch::Sender<AutoSwitchStatus>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Controller {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Envelope>,
        mut devices: watch::Receiver<DeviceSnapshot>,
    ) {
        let mut refresh = self.config.refresh_enabled.then(|| {
            let period = self.config.fetch_interval();
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        logging::info(
            Component::Scheduler,
            None,
            &format!(
                "Controller started: interval {} ms, refresh {}",
                self.config.interval,
                if refresh.is_some() {
                    format!("every {} ms", self.config.fetch_interval)
                } else {
                    "disabled".to_string()
                }
            ),
        );

        self.spawn_fetch(FetchMode::Foreground);
        if self.config.is_auto_switch_on {
            self.flag.set(true, Instant::now());
        }

        loop {
            let tick_at = self.state.tick_deadline();
            let resume_at = self.state.resume_deadline();
            let flag_at = self.flag.deadline();
            let restart_at = self.restart_at;

            tokio::select! {
                biased;

                envelope = commands.recv() => {
                    let Some(Envelope { command, done }) = envelope else {
                        break;
                    };
                    let keep_running = self.handle_command(command);
                    let _ = done.send(());
                    if !keep_running {
                        break;
                    }
                }
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    match joined {
                        Ok((mode, result)) => self.on_fetch_done(mode, result),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => logging::error(Component::Fetcher, None, &format!("Fetch task failed: {}", e)),
                    }
                }
                Some(joined) = self.retries.join_next(), if !self.retries.is_empty() => {
                    if let Ok((device, index)) = joined {
                        self.focus(&device, index, false);
                    }
                }
                _ = sleep_until_opt(flag_at) => self.on_flag_settled(),
                _ = sleep_until_opt(resume_at) => {
                    logging::info(Component::Scheduler, None, "Auto-resume after quiet period");
                    self.resume();
                }
                _ = sleep_until_opt(restart_at) => self.restart(),
                _ = sleep_until_opt(tick_at) => {
                    if let Some(due) = tick_at {
                        self.tick(due);
                    }
                }
                _ = tick_opt(&mut refresh) => {
                    if !self.fetcher.is_in_flight() {
                        self.spawn_fetch(FetchMode::Background);
                    }
                }
                Ok(()) = devices.changed() => self.publish_status(),
            }
        }

        logging::info(Component::Scheduler, None, "Controller stopped");
    }

    /// Returns `false` when the controller should exit.
    fn handle_command(&mut self, command: Command) -> bool {
        logging::debug(Component::Scheduler, None, &format!("Command {:?}", command));
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Toggle => match self.state.kind() {
                StateKind::Stopped => self.start(),
                StateKind::Playing => self.stop(),
                StateKind::Paused => self.resume(),
            },
            Command::Pause(reason) => self.pause(reason),
            Command::Resume => self.resume(),
            Command::SetExternalFlag(on) => self.flag.set(on, Instant::now()),
            Command::Report(report) => self.on_adapter_report(report),
            Command::Refresh => {
                if !self.fetcher.is_in_flight() {
                    self.spawn_fetch(FetchMode::Foreground);
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn start(&mut self) {
        if self.state.kind() != StateKind::Stopped {
            return;
        }
        let devices = self.store.devices();
        self.emit(Signal::Activated {
            active: true,
            current_index: self.position.index(),
            device_count: devices.len(),
        });

        if devices.is_empty() {
            logging::info(Component::Scheduler, None, "Started with no devices, waiting for data");
            self.state = SwitchState::Playing {
                next_tick: None,
                awaiting_data: true,
            };
            if !self.fetcher.is_in_flight() {
                self.spawn_fetch(FetchMode::Foreground);
            }
        } else {
            logging::info(
                Component::Scheduler,
                None,
                &format!("Started at index {} of {}", self.position.index(), devices.len()),
            );
            self.state = SwitchState::playing_at(Instant::now() + self.config.interval());
            self.focus_current(&devices, NoDataContext::Start);
        }
        self.publish_status();
    }

    fn stop(&mut self) {
        if self.state.kind() == StateKind::Stopped {
            return;
        }
        self.state = SwitchState::Stopped;
        self.restart_at = None;
        self.retries.abort_all();
        logging::info(Component::Scheduler, None, "Stopped");
        self.emit(Signal::Deactivated { active: false });
        self.publish_status();
    }

    fn pause(&mut self, reason: Interaction) {
        if self.state.kind() == StateKind::Stopped {
            return;
        }
        let delay = self.config.auto_resume_delay();
        self.state = SwitchState::Paused {
            resume_at: Instant::now() + delay,
            reason,
        };
        logging::info(
            Component::Scheduler,
            None,
            &format!("Paused by {:?}, resuming in {} ms", reason, delay.as_millis()),
        );
        self.emit(Signal::Paused {
            paused: true,
            resume_in: self.config.auto_resume_delay,
            reason,
        });
        self.publish_status();
    }

    fn resume(&mut self) {
        if self.state.kind() != StateKind::Paused {
            return;
        }
        let devices = self.store.devices();
        self.state = SwitchState::playing_at(Instant::now() + self.config.interval());
        self.emit(Signal::Resumed {
            resumed: true,
            current_index: self.position.index(),
            device_count: devices.len(),
        });
        self.focus_current(&devices, NoDataContext::Resume);
        self.publish_status();
    }

    fn tick(&mut self, due: Instant) {
        let devices = self.store.devices();
        self.state = SwitchState::playing_at(next_tick_after(due, self.config.interval(), Instant::now()));

        let Some(next) = self.position.next(devices.len()) else {
            logging::debug(Component::Scheduler, None, "Tick with no devices");
            self.emit(Signal::NoDataAvailable {
                during: NoDataContext::Tick,
            });
            return;
        };
        self.focus(&devices[next], next, true);
        self.position.set(next);
        self.announce(&devices[next], next);
        self.publish_status();
    }

    /// Runs the restart scheduled after a map-not-ready report.
    fn restart(&mut self) {
        self.restart_at = None;
        if self.state.kind() != StateKind::Playing {
            return;
        }
        logging::info(Component::Scheduler, None, "Restarting cycle after map became ready");
        let devices = self.store.devices();
        self.state = SwitchState::playing_at(Instant::now() + self.config.interval());
        self.focus_current(&devices, NoDataContext::Restart);
    }

    fn on_flag_settled(&mut self) {
        let Some(on) = self.flag.take_due(Instant::now()) else {
            return;
        };
        match (on, self.state.kind()) {
            (true, StateKind::Stopped) => {
                logging::info(Component::Scheduler, None, "External switch turned on");
                self.start();
            }
            (false, StateKind::Playing | StateKind::Paused) => {
                logging::info(Component::Scheduler, None, "External switch turned off");
                self.stop();
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Focus and the sink
    // -----------------------------------------------------------------------

    /// Focuses the device at the current position, normalised into range,
    /// or signals that there is nothing to show.
    fn focus_current(&mut self, devices: &[Device], during: NoDataContext) {
        let Some(index) = self.position.current(devices.len()) else {
            logging::warn(Component::Scheduler, None, "No devices to focus");
            self.emit(Signal::NoDataAvailable { during });
            return;
        };
        self.position.set(index);
        self.focus(&devices[index], index, true);
        self.announce(&devices[index], index);
    }

    fn focus(&mut self, device: &Device, index: usize, retry: bool) {
        let id = device.id.as_ref().map(ToString::to_string);
        match self.sink.focus_on(device, index) {
            Ok(()) => {
                self.last_adapter_error = None;
            }
            Err(SinkError::NotReady) => {
                logging::warn(Component::Sink, id.as_deref(), "Map not ready");
                self.emit(Signal::AdapterError {
                    error: SinkError::NotReady.to_string(),
                    retrying: true,
                });
                self.record_adapter_error(SinkError::NotReady.to_string());
                self.schedule_restart();
            }
            Err(e) if retry => {
                logging::warn(Component::Sink, id.as_deref(), &format!("Focus failed, retrying: {}", e));
                self.emit(Signal::AdapterError {
                    error: e.to_string(),
                    retrying: true,
                });
                let delay = self.config.adapter_retry_delay();
                let device = device.clone();
                self.retries.spawn(async move {
                    tokio::time::sleep(delay).await;
                    (device, index)
                });
            }
            Err(e) => {
                logging::error(Component::Sink, id.as_deref(), &format!("Focus failed after retry: {}", e));
                self.emit(Signal::AdapterError {
                    error: e.to_string(),
                    retrying: false,
                });
                self.record_adapter_error(e.to_string());
            }
        }
    }

    fn on_adapter_report(&mut self, report: AdapterReport) {
        match report {
            AdapterReport::Success => {
                if self.last_adapter_error.take().is_some() {
                    self.publish_status();
                }
            }
            AdapterReport::Error { error, kind } => {
                logging::warn(Component::Sink, None, &format!("Map reported error ({:?}): {}", kind, error));
                self.record_adapter_error(error);
                if kind == AdapterErrorKind::MapNotReady {
                    self.schedule_restart();
                }
            }
        }
    }

    fn schedule_restart(&mut self) {
        if self.state.kind() == StateKind::Stopped || self.restart_at.is_some() {
            return;
        }
        let delay: Duration = self.config.map_not_ready_retry_delay();
        self.restart_at = Some(Instant::now() + delay);
    }

    fn record_adapter_error(&mut self, error: String) {
        self.last_adapter_error = Some(error);
        self.publish_status();
    }

    // -----------------------------------------------------------------------
    // Fetching
    // -----------------------------------------------------------------------

    fn spawn_fetch(&mut self, mode: FetchMode) {
        let fetcher = self.fetcher.clone();
        self.fetches.spawn(async move { (mode, fetcher.fetch(mode).await) });
    }

    fn on_fetch_done(&mut self, mode: FetchMode, result: Result<FetchOutcome, FetchError>) {
        match &result {
            Ok(FetchOutcome::Skipped) => return,
            Ok(_) => {}
            Err(e) => {
                let attempts = match e {
                    FetchError::Exhausted { attempts, .. } => *attempts,
                    _ => 1,
                };
                self.emit(Signal::DevicesFetchFailed {
                    attempts,
                    error: e.to_string(),
                });
            }
        }
        logging::debug(Component::Fetcher, None, &format!("{:?} fetch finished: {:?}", mode, result));

        if self.state.is_awaiting_data() {
            let devices = self.store.devices();
            self.state = SwitchState::playing_at(Instant::now() + self.config.interval());
            self.focus_current(&devices, NoDataContext::Start);
            self.publish_status();
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn announce(&self, device: &Device, index: usize) {
        self.emit(Signal::StationChanged {
            index,
            device_id: device.id.clone(),
            name: device.name.clone(),
        });
    }

    fn emit(&self, signal: Signal) {
        // No receivers is fine.
        let _ = self.signals.send(signal);
    }

    fn publish_status(&self) {
        let status = AutoSwitchStatus {
            state: self.state.kind(),
            current_index: self.position.index(),
            device_count: self.store.len(),
            last_adapter_error: self.last_adapter_error.clone(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
