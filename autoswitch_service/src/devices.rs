//! Shared device list for the auto-switch controller.
//!
//! The store is the single source of truth for which stations exist. The
//! fetcher is the only writer; the scheduler and any host code only read.
//! The list is always swapped as a whole (`Arc<[Device]>`), so a tick that
//! reads it mid-refresh sees either the old list or the new one, never a mix.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::model::{Device, same_id_sequence};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything a reader can observe about the device list at one instant.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub devices: Arc<[Device]>,
    /// Time of the last successful fetch, whether or not it changed the list.
    pub last_fetch: Option<DateTime<Utc>>,
    /// A foreground fetch is in progress.
    pub loading: bool,
    /// Message of the last exhausted fetch; cleared by the next success.
    pub last_error: Option<String>,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            devices: Arc::from(Vec::new()),
            last_fetch: None,
            loading: false,
            last_error: None,
        }
    }
}

/// Result of offering a freshly fetched list to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Length or id order differed; the list was swapped and subscribers notified.
    Replaced,
    /// Same ids in the same order; the stored list was kept.
    Unchanged,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to the shared device list.
#[derive(Debug, Clone)]
pub struct DeviceStore {
    inner: Arc<watch::Sender<DeviceSnapshot>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DeviceSnapshot::default());
        Self { inner: Arc::new(tx) }
    }

    /// The current list.
    pub fn devices(&self) -> Arc<[Device]> {
        Arc::clone(&self.inner.borrow().devices)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.inner.borrow().clone()
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.inner.borrow().last_fetch
    }

    pub fn is_loading(&self) -> bool {
        self.inner.borrow().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.borrow().last_error.clone()
    }

    /// Subscribes to changes. Receivers are woken when the list is replaced
    /// or the loading/error state changes, not on every refresh.
    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.inner.subscribe()
    }

    /// Offers a validated list fetched at `fetched_at`.
    ///
    /// `last_fetch` is always advanced and `last_error` cleared, but the list
    /// itself is only swapped (and subscribers only notified) when its
    /// length or ordered id sequence differs from the stored one.
    pub(crate) fn replace(&self, devices: Vec<Device>, fetched_at: DateTime<Utc>) -> ReplaceOutcome {
        let mut outcome = ReplaceOutcome::Unchanged;
        self.inner.send_if_modified(|snapshot| {
            let had_error = snapshot.last_error.take().is_some();
            snapshot.last_fetch = Some(fetched_at);
            if same_id_sequence(&snapshot.devices, &devices) {
                return had_error;
            }
            snapshot.devices = Arc::from(devices);
            outcome = ReplaceOutcome::Replaced;
            true
        });
        outcome
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.inner.send_if_modified(|snapshot| {
            let changed = snapshot.loading != loading;
            snapshot.loading = loading;
            changed
        });
    }

    /// Records a terminal fetch failure. The stored list is left as it is.
    pub(crate) fn record_error(&self, message: String) {
        self.inner.send_modify(|snapshot| snapshot.last_error = Some(message));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
