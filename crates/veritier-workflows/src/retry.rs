//! Retry and timeout policy for activity dispatch.
//!
//! Every external call a workflow makes goes through `call_with_retry`:
//! bounded wall-clock timeout per attempt, exponential backoff between
//! attempts, and a hard attempt cap. Input errors never retry.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Failure taxonomy for activity calls.
#[derive(Debug, Clone, Error)]
pub enum ActivityError {
    /// Bad input (rule not found, malformed facts). Never retried.
    #[error("invalid input: {0}")]
    Input(String),
    /// Transient external failure. Retried up to the attempt cap.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Attempt exceeded its timeout class. Retried like a transient failure.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Input(_))
    }
}

/// Exponential backoff policy applied uniformly to activity calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(60),
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry (attempt numbers start at 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_interval.mul_f64(factor);
        delay.min(self.maximum_interval)
    }
}

/// Wall-clock budget per activity attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Cheap lookups and schema checks (~30s).
    Short,
    /// Embedding/NLI-backed tier checks (~2min).
    Medium,
    /// Full corpus scans (~10min).
    Long,
}

impl TimeoutClass {
    pub fn duration(&self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(30),
            Self::Medium => Duration::from_secs(120),
            Self::Long => Duration::from_secs(600),
        }
    }
}

/// Run an activity with per-attempt timeout and exponential-backoff retry.
///
/// The closure is re-invoked for each attempt. Exhausting the attempt cap
/// surfaces the last error to the workflow.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: TimeoutClass,
    operation: &str,
    mut call: F,
) -> Result<T, ActivityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let mut attempt = 1u32;
    loop {
        let outcome = match tokio::time::timeout(timeout.duration(), call()).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::TimedOut(timeout.duration())),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.maximum_attempts => {
                warn!(operation, attempt, error = %e, "activity exhausted retries");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %e, "activity failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
