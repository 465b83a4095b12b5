//! Station auto-switch service.
//!
//! Cycles a flood dashboard's map focus through the monitoring stations
//! returned by the backend, one station per interval, pausing while the
//! user interacts with the map.
//!
//! ```text
//! ingest ──► fetcher ──► devices (shared list) ──► scheduler ──► sink
//!                                                     ▲
//!                               map view signals ─────┘
//! ```

pub mod config;
pub mod devices;
pub mod fetcher;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod staleness;

pub use devices::DeviceStore;
pub use model::{Device, DeviceId, FetchError};
pub use scheduler::{AutoSwitchController, AutoSwitchHandle, AutoSwitchStatus, Signal};
pub use sink::{FocusSink, SinkError};
