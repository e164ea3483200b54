//! Resilience patterns for connector operations.
//!
//! Provides an explicit per-call deadline and bounded retry with exponential
//! backoff. The façade never retries on its own; engines wrap individual
//! remote calls in a [`CallPolicy`]. Streamed calls get an idle deadline
//! through [`StreamWatch`] instead.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one; 1 disables retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial delay before first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between retries.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// No retry at all.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `max_attempts` total attempts with the default backoff.
    #[must_use]
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Calculate delay for a given retry (0-indexed).
    fn delay(&self, retry: u32) -> Duration {
        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);

        let delay_ms = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            delay_ms * (1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Deadline and retry policy applied around a single remote call.
#[derive(Debug, Clone, Default)]
pub struct CallPolicy {
    retry: RetryConfig,
    timeout: Option<Duration>,
}

impl CallPolicy {
    #[must_use]
    pub fn new(retry: RetryConfig, timeout: Option<Duration>) -> Self {
        Self { retry, timeout }
    }

    /// A policy that only imposes a deadline.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(RetryConfig::none(), Some(timeout))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Execute an operation under the deadline, retrying transient errors.
    ///
    /// A timed-out attempt becomes `ConnectorError::Timeout`; it is retried
    /// only if the retry policy allows more than one attempt.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match with_deadline(operation_name, self.timeout, operation()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() || attempt >= max_attempts {
                        return Err(e);
                    }

                    let delay = self.retry.delay(attempt - 1);
                    debug!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Run a future under an optional deadline, mapping expiry to `Timeout`.
pub async fn with_deadline<Fut, T>(
    operation_name: &str,
    deadline: Option<Duration>,
    future: Fut,
) -> ConnectorResult<T>
where
    Fut: Future<Output = ConnectorResult<T>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::timeout(
                operation_name,
                limit.as_millis() as u64,
            )),
        },
        None => future.await,
    }
}

/// Activity tracker for a streamed connector call.
///
/// The connector is idle while it runs without delivering anything. Time
/// spent inside the caller's handler is never idle time.
#[derive(Debug)]
pub struct StreamWatch {
    state: Mutex<WatchState>,
}

#[derive(Debug)]
struct WatchState {
    last_activity: Instant,
    in_handler: bool,
}

impl Default for StreamWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamWatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WatchState {
                last_activity: Instant::now(),
                in_handler: false,
            }),
        }
    }

    /// Mark a handler callback; the idle clock restarts when the guard drops.
    pub fn enter(&self) -> WatchGuard<'_> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_handler = true;
        WatchGuard { watch: self }
    }

    /// When the stream counts as stalled, or `None` while a handler runs.
    fn idle_deadline(&self, idle: Duration) -> Option<Instant> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (!state.in_handler).then(|| state.last_activity + idle)
    }
}

/// Returned by [`StreamWatch::enter`].
#[derive(Debug)]
pub struct WatchGuard<'a> {
    watch: &'a StreamWatch,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .watch
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.in_handler = false;
        state.last_activity = Instant::now();
    }
}

/// Run a streamed call, failing with `Timeout` once the connector stays idle
/// for longer than `idle`.
pub async fn with_idle_deadline<Fut, T>(
    operation_name: &str,
    idle: Option<Duration>,
    watch: &StreamWatch,
    future: Fut,
) -> ConnectorResult<T>
where
    Fut: Future<Output = ConnectorResult<T>>,
{
    let Some(limit) = idle else {
        return future.await;
    };
    let mut future = std::pin::pin!(future);

    loop {
        let wake = match watch.idle_deadline(limit) {
            Some(deadline) if deadline <= Instant::now() => {
                warn!(
                    operation = operation_name,
                    idle_ms = limit.as_millis() as u64,
                    "Stream stalled"
                );
                return Err(ConnectorError::timeout(
                    operation_name,
                    limit.as_millis() as u64,
                ));
            }
            Some(deadline) => deadline,
            None => Instant::now() + limit,
        };
        tokio::select! {
            biased;
            result = &mut future => return result,
            () = tokio::time::sleep_until(wake) => {}
        }
    }
}
