//! Structured logging for the station auto-switch service
//!
//! Provides context-rich logging tagged with the emitting component and,
//! where relevant, the device being handled. Output goes through `tracing`
//! to the console and optionally to an append-only log file for daemon use.

use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, fmt as tfmt};

use crate::model::FetchError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Fetcher,
    Scheduler,
    Sink,
    Config,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Fetcher => write!(f, "FETCH"),
            Component::Scheduler => write!(f, "SCHED"),
            Component::Sink => write!(f, "SINK"),
            Component::Config => write!(f, "CFG"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - backend restarting, listing temporarily empty
    Expected,
    /// Unexpected failure - indicates service degradation or an API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialisation
// ---------------------------------------------------------------------------

/// Initialize the global subscriber.
///
/// Console output always; `log_file` adds a plain-text layer appending to
/// that path. Calling this twice keeps the first subscriber.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&str>,
    console_timestamps: bool,
) -> std::io::Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = tfmt::layer().with_target(false);
    if console_timestamps {
        layers.push(console.boxed());
    } else {
        layers.push(console.without_time().boxed());
    }

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(
            tfmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(LevelFilter::from(min_level))
        .try_init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(component: Component, device: Option<&str>, message: &str) {
    tracing::info!(component = %component, device = device.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(component: Component, device: Option<&str>, message: &str) {
    tracing::warn!(component = %component, device = device.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(component: Component, device: Option<&str>, message: &str) {
    tracing::error!(component = %component, device = device.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(component: Component, device: Option<&str>, message: &str) {
    tracing::debug!(component = %component, device = device.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a device fetch failure
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        // Backend restarts and gateway hiccups show up as 502/503/504
        FetchError::Http(502..=504) => FailureType::Expected,
        // Other statuses mean auth or routing is broken
        FetchError::Http(_) => FailureType::Unexpected,
        // Shape errors suggest an API change
        FetchError::InvalidShape(_) => FailureType::Unexpected,
        FetchError::Exhausted { .. } => FailureType::Unexpected,
        FetchError::Transport(_) | FetchError::NoValidDevices { .. } => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log one failed fetch attempt with automatic classification
pub fn log_fetch_failure(attempt: u32, max_attempts: u32, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);
    let message = format!(
        "Attempt {}/{} failed [{}]: {}",
        attempt + 1,
        max_attempts,
        failure_type,
        err
    );

    match failure_type {
        FailureType::Expected => debug(Component::Fetcher, None, &message),
        FailureType::Unexpected => error(Component::Fetcher, None, &message),
        FailureType::Unknown => warn(Component::Fetcher, None, &message),
    }
}

/// Log a summary of one completed refresh
pub fn log_refresh_summary(received: usize, valid: usize, replaced: bool) {
    let dropped = received - valid;
    let message = format!(
        "Refresh complete: {}/{} devices valid, {} dropped, list {}",
        valid,
        received,
        dropped,
        if replaced { "replaced" } else { "unchanged" }
    );

    if dropped == 0 {
        info(Component::Fetcher, None, &message);
    } else {
        warn(Component::Fetcher, None, &message);
    }
}
