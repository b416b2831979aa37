//! Retry policy and the retrying client for the activity source

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use huntbot_core::BotConfig;

use crate::context::SchedulerContext;

/// How a failed call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Quota or rate-limit rejection; wait and try again
    Retryable,
    /// Anything else; do not retry
    Fatal,
}

/// Errors that know their own retry classification.
pub trait Classify {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Retryable
    }
}

/// Fixed-delay retry configuration
///
/// # Example
///
/// ```
/// use huntbot_engine::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::fixed(Duration::from_secs(5), 10);
/// assert!(policy.has_attempts_remaining(10));
/// assert!(!policy.has_attempts_remaining(11));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt
    pub max_retries: u32,

    /// Delay before each retry
    #[serde(with = "crate::duration_millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5), 10)
    }
}

impl RetryPolicy {
    /// Create a policy with a fixed delay between attempts
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self { max_retries, delay }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self::fixed(Duration::ZERO, 0)
    }

    /// Build the policy currently configured for the activity source
    pub fn from_config(config: &BotConfig) -> Self {
        Self::fixed(config.retry_delay, config.retry_max_attempts)
    }

    /// Delay before the given attempt (1-based). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn has_attempts_remaining(&self, attempts_made: u32) -> bool {
        attempts_made <= self.max_retries
    }
}

/// Result of a retried call. Giving up is a value, not an error, so callers
/// can skip the item and carry on.
#[derive(Debug)]
pub enum CallOutcome<T, E> {
    /// The call succeeded, possibly after retries
    Success(T),
    /// Every attempt hit a retryable error
    GaveUp { attempts: u32, last_error: E },
    /// A fatal error; no retry was attempted after it
    Failed(E),
}

impl<T, E> CallOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Map the success value, keeping failure variants as they are
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U, E> {
        match self {
            Self::Success(value) => CallOutcome::Success(f(value)),
            Self::GaveUp {
                attempts,
                last_error,
            } => CallOutcome::GaveUp {
                attempts,
                last_error,
            },
            Self::Failed(e) => CallOutcome::Failed(e),
        }
    }
}

/// Wraps calls to the activity source with rate limiting and quota retries.
///
/// Every attempt goes through the context's rate limiter first. Each
/// retryable failure bumps the context's quota-failure counter.
#[derive(Clone)]
pub struct RetryableClient {
    ctx: Arc<SchedulerContext>,
}

impl RetryableClient {
    pub fn new(ctx: Arc<SchedulerContext>) -> Self {
        Self { ctx }
    }

    /// Run `op`, classifying failures through the error's own [`Classify`] impl
    pub async fn call<T, E, F, Fut>(&self, operation: &str, op: F) -> CallOutcome<T, E>
    where
        E: Classify + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(operation, op, |e: &E| e.classify()).await
    }

    /// Run `op` with a caller-supplied classifier
    pub async fn call_with<T, E, F, Fut, C>(
        &self,
        operation: &str,
        mut op: F,
        classify: C,
    ) -> CallOutcome<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
    {
        let policy = RetryPolicy::from_config(&self.ctx.config());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.ctx.acquire_slot().await;

            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Call succeeded after retries");
                    }
                    return CallOutcome::Success(value);
                }
                Err(e) => e,
            };

            if classify(&error) == ErrorClass::Fatal {
                debug!(operation, attempt, error = %error, "Call failed, not retryable");
                return CallOutcome::Failed(error);
            }

            let total = self.ctx.record_quota_failure();
            if !policy.has_attempts_remaining(attempt) {
                warn!(
                    operation,
                    attempts = attempt,
                    quota_failures = total,
                    error = %error,
                    "Giving up after repeated quota failures"
                );
                return CallOutcome::GaveUp {
                    attempts: attempt,
                    last_error: error,
                };
            }

            let delay = policy.delay_for_attempt(attempt + 1);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Quota exceeded, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
