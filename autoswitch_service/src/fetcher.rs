//! Device Data Fetcher.
//!
//! Pulls the listing from a [`DeviceSource`], validates it, retries with
//! the configured [`RetryPolicy`], and offers the result to the
//! [`DeviceStore`]. A failed cycle never clears the stored list.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::devices::{DeviceStore, ReplaceOutcome};
use crate::ingest::{DeviceSource, unwrap_records};
use crate::logging::{self, Component};
use crate::model::{Device, FetchError, filter_valid};
use crate::retry::{RetryPolicy, retry_with_policy};

/// Whether a fetch is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Initial or on-demand fetch; drives the loading indicator.
    Foreground,
    /// Periodic refresh; never touches the loading indicator.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A new list with `count` devices was stored.
    Replaced { count: usize },
    /// The listing had the same ids in the same order as the stored one.
    Unchanged { count: usize },
    /// Another fetch was already running; nothing was done.
    Skipped,
}

/// Fetches, validates and stores the device list.
#[derive(Clone)]
pub struct DeviceFetcher {
    source: Arc<dyn DeviceSource>,
    policy: RetryPolicy,
    store: DeviceStore,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag (and the loading indicator for foreground
/// fetches) when the fetch ends, including when its task is aborted.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    store: &'a DeviceStore,
    mode: FetchMode,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.mode == FetchMode::Foreground {
            self.store.set_loading(false);
        }
        self.flag.store(false, Ordering::Release);
    }
}

impl DeviceFetcher {
    pub fn new(source: Arc<dyn DeviceSource>, policy: RetryPolicy, store: DeviceStore) -> Self {
        Self {
            source,
            policy,
            store,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs one fetch cycle.
    ///
    /// Returns `Skipped` without calling the source if a cycle is already
    /// running. On exhaustion the error is recorded in the store and
    /// returned as `FetchError::Exhausted`; the stored list is untouched.
    pub async fn fetch(&self, mode: FetchMode) -> Result<FetchOutcome, FetchError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            logging::debug(Component::Fetcher, None, "Fetch already in flight, skipping");
            return Ok(FetchOutcome::Skipped);
        }
        let _guard = InFlightGuard {
            flag: &self.in_flight,
            store: &self.store,
            mode,
        };
        if mode == FetchMode::Foreground {
            self.store.set_loading(true);
        }

        let max_attempts = self.policy.max_attempts();
        let result = retry_with_policy(
            &self.policy,
            FetchError::is_retryable,
            |attempt, err| logging::log_fetch_failure(attempt, max_attempts, err),
            |_| self.fetch_once(),
        )
        .await;

        match result {
            Ok((received, devices)) => {
                let count = devices.len();
                let outcome = self.store.replace(devices, Utc::now());
                let replaced = outcome == ReplaceOutcome::Replaced;
                logging::log_refresh_summary(received, count, replaced);
                Ok(if replaced {
                    FetchOutcome::Replaced { count }
                } else {
                    FetchOutcome::Unchanged { count }
                })
            }
            Err(exhausted) => {
                let err = FetchError::Exhausted {
                    attempts: exhausted.attempts,
                    last: Box::new(exhausted.last),
                };
                logging::error(Component::Fetcher, None, &err.to_string());
                self.store.record_error(err.to_string());
                Err(err)
            }
        }
    }

    /// One attempt: request, unwrap the envelope, filter. Returns the number
    /// of raw records alongside the valid devices.
    async fn fetch_once(&self) -> Result<(usize, Vec<Device>), FetchError> {
        let body = self.source.fetch_raw().await?;
        let records = unwrap_records(body)?;
        let devices = filter_valid(&records);
        if devices.is_empty() {
            return Err(FetchError::NoValidDevices {
                received: records.len(),
            });
        }
        Ok((records.len(), devices))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays scripted responses and records when each call happened.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Value, FetchError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Value, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceSource for ScriptedSource {
        async fn fetch_raw(&self) -> Result<Value, FetchError> {
            self.calls.lock().unwrap().push(Instant::now());
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(response) => response,
                None => Err(FetchError::Transport("script exhausted".to_string())),
            }
        }
    }

    fn listing(ids: &[i64]) -> Value {
        let data: Vec<_> = ids
            .iter()
            .map(|id| json!({ "id": id, "name": format!("Pos {}", id), "latitude": -6.2, "longitude": 106.8 }))
            .collect();
        json!({ "data": data })
    }

    fn fetcher_for(source: Arc<ScriptedSource>) -> DeviceFetcher {
        DeviceFetcher::new(source, RetryPolicy::default(), DeviceStore::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_success_stores_fourth_result() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Http(503)),
            Err(FetchError::Transport("connection reset".to_string())),
            Ok(json!({ "data": [{ "name": "no location" }] })),
            Ok(listing(&[1, 2, 3])),
        ]);
        let fetcher = fetcher_for(source.clone());

        let outcome = fetcher.fetch(FetchMode::Foreground).await;

        assert_eq!(outcome, Ok(FetchOutcome::Replaced { count: 3 }));
        let times = source.call_times();
        assert_eq!(times.len(), 4, "exactly 3 retries after the first attempt");
        let gaps: Vec<_> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(6000),
            ]
        );
        assert_eq!(fetcher.store().len(), 3);
        assert!(!fetcher.store().is_loading());
        assert!(!fetcher.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_fetch_keeps_previous_list() {
        let source = ScriptedSource::new(vec![
            Ok(listing(&[10, 20])),
            Err(FetchError::Http(500)),
            Err(FetchError::Http(500)),
            Err(FetchError::Http(500)),
            Err(FetchError::Http(500)),
        ]);
        let fetcher = fetcher_for(source.clone());

        fetcher
            .fetch(FetchMode::Foreground)
            .await
            .expect("first fetch should succeed");
        let before = fetcher.store().devices();

        let result = fetcher.fetch(FetchMode::Background).await;

        match result {
            Err(FetchError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(*last, FetchError::Http(500));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(Arc::ptr_eq(&before, &fetcher.store().devices()));
        assert!(fetcher.store().last_error().is_some());
        assert_eq!(source.call_times().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_listing_counts_as_failure() {
        let source = ScriptedSource::new(vec![
            Ok(json!({ "data": [] })),
            Ok(json!([])),
            Ok(json!({ "data": [{ "id": 1 }] })),
            Ok(json!({ "data": [] })),
        ]);
        let fetcher = fetcher_for(source);

        let result = fetcher.fetch(FetchMode::Foreground).await;

        match result {
            Err(FetchError::Exhausted { last, .. }) => {
                assert_eq!(*last, FetchError::NoValidDevices { received: 0 });
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(fetcher.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_listing_is_reported_unchanged() {
        let source = ScriptedSource::new(vec![Ok(listing(&[1, 2])), Ok(listing(&[1, 2]))]);
        let fetcher = fetcher_for(source);

        assert_eq!(
            fetcher.fetch(FetchMode::Foreground).await,
            Ok(FetchOutcome::Replaced { count: 2 })
        );
        assert_eq!(
            fetcher.fetch(FetchMode::Background).await,
            Ok(FetchOutcome::Unchanged { count: 2 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fetch_is_a_silent_no_op() {
        let source = ScriptedSource::new(vec![Err(FetchError::Http(503)), Ok(listing(&[1]))]);
        let fetcher = fetcher_for(source.clone());

        let running = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(FetchMode::Foreground).await }
        });
        // Let the first fetch fail once and park in its backoff sleep.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fetcher.is_in_flight());
        assert!(fetcher.store().is_loading());

        assert_eq!(
            fetcher.fetch(FetchMode::Background).await,
            Ok(FetchOutcome::Skipped)
        );
        assert_eq!(source.call_times().len(), 1, "skipped fetch must not hit the source");

        let first = running.await.expect("fetch task should not panic");
        assert_eq!(first, Ok(FetchOutcome::Replaced { count: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_fetch_does_not_toggle_loading() {
        let source = ScriptedSource::new(vec![Err(FetchError::Http(503)), Ok(listing(&[1]))]);
        let fetcher = fetcher_for(source);

        let running = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(FetchMode::Background).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fetcher.is_in_flight());
        assert!(!fetcher.store().is_loading());

        running.await.expect("fetch task should not panic").expect("fetch should succeed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_fetch_releases_the_in_flight_flag() {
        let source = ScriptedSource::new(vec![Err(FetchError::Http(503)), Ok(listing(&[1]))]);
        let fetcher = fetcher_for(source);

        let running = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(FetchMode::Foreground).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        running.abort();
        let _ = running.await;

        assert!(!fetcher.is_in_flight());
        assert!(!fetcher.store().is_loading());
    }
}
