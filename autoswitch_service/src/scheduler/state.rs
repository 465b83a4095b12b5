//! Controller state, cycle position and the external-flag debounce.
//!
//! # State Machine
//!
//! ```text
//!            start                 interaction
//!  Stopped ─────────► Playing ─────────────────► Paused
//!     ▲                │  ▲                        │
//!     │     stop       │  │  resume / resume_at    │
//!     ├────────────────┘  └────────────────────────┤
//!     │                      stop                  │
//!     └────────────────────────────────────────────┘
//! ```
//!
//! Every variant carries exactly the timer deadlines that are live in it,
//! so a stopped controller cannot have a tick pending and a playing one
//! cannot have an auto-resume pending.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::scheduler::signals::Interaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Stopped,
    Playing,
    Paused,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKind::Stopped => write!(f, "stopped"),
            StateKind::Playing => write!(f, "playing"),
            StateKind::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchState {
    Stopped,
    Playing {
        /// `None` while waiting for the start-triggered fetch.
        next_tick: Option<Instant>,
        /// Started with an empty list; the first completed fetch focuses
        /// the current device and arms the tick.
        awaiting_data: bool,
    },
    Paused {
        resume_at: Instant,
        reason: Interaction,
    },
}

impl SwitchState {
    pub fn kind(&self) -> StateKind {
        match self {
            SwitchState::Stopped => StateKind::Stopped,
            SwitchState::Playing { .. } => StateKind::Playing,
            SwitchState::Paused { .. } => StateKind::Paused,
        }
    }

    pub fn tick_deadline(&self) -> Option<Instant> {
        match self {
            SwitchState::Playing { next_tick, .. } => *next_tick,
            _ => None,
        }
    }

    pub fn resume_deadline(&self) -> Option<Instant> {
        match self {
            SwitchState::Paused { resume_at, .. } => Some(*resume_at),
            _ => None,
        }
    }

    pub fn is_awaiting_data(&self) -> bool {
        matches!(self, SwitchState::Playing { awaiting_data: true, .. })
    }

    /// Playing with the tick armed at `next_tick`.
    pub fn playing_at(next_tick: Instant) -> Self {
        SwitchState::Playing {
            next_tick: Some(next_tick),
            awaiting_data: false,
        }
    }
}

/// Deadline of the tick after one that was due at `previous`.
///
/// Deadlines advance by whole intervals from the previous deadline so a
/// slow tick does not push every later one back. If the controller fell a
/// full interval behind, the schedule is re-anchored on `now` instead of
/// firing a burst of catch-up ticks.
pub fn next_tick_after(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous + interval;
    if next <= now { now + interval } else { next }
}

// ---------------------------------------------------------------------------
// Cycle position
// ---------------------------------------------------------------------------

/// Index into the device list. Wraps modulo the list length at use time,
/// never clamps, so a list that shrank under it keeps cycling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CyclePosition {
    index: usize,
}

impl CyclePosition {
    pub fn index(&self) -> usize {
        self.index
    }

    /// The index a tick moves to, or `None` for an empty list.
    pub fn next(&self, len: usize) -> Option<usize> {
        (len > 0).then(|| (self.index + 1) % len)
    }

    /// The current index brought back into range, or `None` for an empty list.
    pub fn current(&self, len: usize) -> Option<usize> {
        (len > 0).then(|| self.index % len)
    }

    pub fn set(&mut self, index: usize) {
        self.index = index;
    }
}

// ---------------------------------------------------------------------------
// External flag debounce
// ---------------------------------------------------------------------------

/// Settles an externally driven on/off flag.
///
/// Each `set` restarts the window; only the last value of a burst is
/// delivered, once the flag has been quiet for `window`.
#[derive(Debug)]
pub struct FlagDebounce {
    window: Duration,
    pending: Option<(bool, Instant)>,
}

impl FlagDebounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn set(&mut self, value: bool, now: Instant) {
        self.pending = Some((value, now + self.window));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, due)| due)
    }

    /// Returns the settled value once its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<bool> {
        match self.pending {
            Some((value, due)) if due <= now => {
                self.pending = None;
                Some(value)
            }
            _ => None,
        }
    }
}
