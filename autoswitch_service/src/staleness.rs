//! Device list staleness.
//!
//! The dashboard refreshes the station list every few seconds, so a list
//! that has not been confirmed by a successful fetch for a minute means the
//! backend is unreachable even if the scheduler is still cycling happily
//! through the last good copy.
//!
//! # Clock injection
//! [`is_stale_at`] takes `now` as a parameter so tests stay deterministic.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Returns `true` if the last successful fetch is older than `max_age`.
///
/// Staleness is strictly greater than the threshold:
///   age > max_age  →  stale
///   age == max_age →  not stale
///
/// A list that was never fetched is stale. A `last_fetch` in the future
/// (clock skew) is treated as fresh.
pub fn is_stale_at(last_fetch: Option<DateTime<Utc>>, max_age: Duration, now: DateTime<Utc>) -> bool {
    let Some(fetched_at) = last_fetch else {
        return true;
    };
    match (now - fetched_at).to_std() {
        Ok(age) => age > max_age,
        Err(_) => false,
    }
}

/// [`is_stale_at`] against the real current time.
pub fn is_stale(last_fetch: Option<DateTime<Utc>>, max_age: Duration) -> bool {
    is_stale_at(last_fetch, max_age, Utc::now())
}
