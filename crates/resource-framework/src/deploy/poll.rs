//! # Polling and Retries
//!
//! Long-running cloud operations are awaited with [`poll_until_ready`]: a check is
//! repeated with bounded exponential backoff until it reports [`PollOutcome::Ready`],
//! reports [`PollOutcome::Failed`], or the configured timeout elapses. Checks that hit
//! throttling or a not-yet-visible resource count as "not ready yet".
//!
//! Individual collaborator calls go through [`retry_transient`], which retries only
//! throttling errors, a bounded number of times, before handing the error back.

use super::error::CloudError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Three-way result of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    NotReadyYet(String),
    Failed(String),
}

/// Backoff and timeout of one wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(with = "crate::config::duration_ms")]
    pub initial_interval: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub max_interval: Duration,
    pub multiplier: f64,
    #[serde(with = "crate::config::duration_ms")]
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn next_interval(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.multiplier.max(1.0);
        Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64()))
    }
}

/// Why a wait ended without the resource becoming ready.
#[derive(Debug, Clone, PartialEq)]
pub enum PollError {
    Cloud(CloudError),
    Cancelled,
}

/// Repeats `check` until ready. Returns the time spent waiting.
pub async fn poll_until_ready<F, Fut>(
    what: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<Duration, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome, CloudError>>,
{
    let started = Instant::now();
    let mut interval = config.initial_interval;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match check().await {
            Ok(PollOutcome::Ready) => {
                debug!(what, attempt, "Ready");
                return Ok(started.elapsed());
            }
            Ok(PollOutcome::Failed(reason)) => {
                return Err(PollError::Cloud(CloudError::Service(format!("{what} failed: {reason}"))));
            }
            Ok(PollOutcome::NotReadyYet(reason)) => debug!(what, attempt, %reason, "Not ready yet"),
            Err(e @ (CloudError::Throttled(_) | CloudError::NotFound(_))) => {
                debug!(what, attempt, error = %e, "Check inconclusive");
            }
            Err(e) => return Err(PollError::Cloud(e)),
        }

        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            return Err(PollError::Cloud(CloudError::Timeout {
                what: what.to_string(),
                waited: elapsed,
            }));
        }
        let pause = interval.min(config.timeout - elapsed);
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
        interval = config.next_interval(interval);
    }
}

/// Bounded retries for throttled collaborator calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "crate::config::duration_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Runs `op`, retrying throttling errors until `policy` is exhausted.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    retry_while(policy, what, CloudError::is_transient, op).await
}

/// Runs `op`, retrying the errors `retryable` accepts until `policy` is exhausted.
/// The last error is returned as is.
pub async fn retry_while<T, E, F, Fut, R>(policy: &RetryPolicy, what: &str, retryable: R, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    let mut backoff = policy.initial_backoff;
    loop {
        match op().await {
            Err(e) if retryable(&e) && attempt < policy.max_attempts => {
                warn!(what, attempt, error = %e, "Transient failure, backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            other => return other,
        }
    }
}
