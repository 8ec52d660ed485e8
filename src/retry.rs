//! Retry mechanism with exponential backoff
//!
//! Failures are handled per [`FailureKind`]:
//!
//! - `RateLimited`: always wait and retry, consuming an attempt.
//! - `Server`: wait and retry while attempts remain; on the last attempt the
//!   error is returned to the caller.
//! - `Transport` (including timeouts): wait and retry while attempts remain;
//!   on the last attempt the failure is logged and the result is `Ok(None)`.
//! - `Client`: returned immediately, without waiting.
//!
//! Attempt `i` (starting at 0) waits `base_delay * backoff_factor^i`, and
//! `max_retries` bounds the total number of attempts.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{default_clock, SharedClock};
use crate::config::RetryConfig;
use crate::error::{FailureKind, FetchError, GovernanceError, Result};

/// Retries a fallible operation with exponential backoff.
#[derive(Clone)]
pub struct BackoffRetrier {
    config: RetryConfig,
    clock: SharedClock,
}

impl std::fmt::Debug for BackoffRetrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffRetrier")
            .field("config", &self.config)
            .finish()
    }
}

impl BackoffRetrier {
    /// Create a retrier. `max_retries` must be at least 1 and
    /// `backoff_factor` greater than 1.
    pub fn new(config: RetryConfig) -> Result<Self> {
        Self::with_clock(config, default_clock())
    }

    pub fn with_clock(config: RetryConfig, clock: SharedClock) -> Result<Self> {
        if config.max_retries == 0 {
            return Err(GovernanceError::invalid("max_retries must be at least 1"));
        }
        if !(config.backoff_factor.is_finite() && config.backoff_factor > 1.0) {
            return Err(GovernanceError::invalid(format!(
                "backoff_factor must be greater than 1, got {}",
                config.backoff_factor
            )));
        }
        if !(config.base_delay_secs.is_finite() && config.base_delay_secs > 0.0) {
            return Err(GovernanceError::invalid("base_delay_secs must be positive"));
        }
        Ok(Self { config, clock })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Wait applied after a failed attempt with index `attempt`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut secs = self.config.base_delay_secs * self.config.backoff_factor.powi(exponent);

        if let Some(max) = self.config.max_delay_secs {
            secs = secs.min(max);
        }

        if self.config.jitter {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter: f64 = rng.gen_range(0.0..0.3);
            secs += secs * jitter;
        }

        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    async fn backoff(&self, attempt: usize, error: &FetchError) {
        let delay = self.delay_for_attempt(attempt);
        match error {
            FetchError::RateLimited => {
                warn!(
                    attempt = attempt + 1,
                    "Rate limited. Waiting {:.1}s...",
                    delay.as_secs_f64()
                );
            }
            FetchError::Server { status } => {
                warn!(
                    attempt = attempt + 1,
                    "Server error {}. Retrying in {:.1}s...",
                    status,
                    delay.as_secs_f64()
                );
            }
            other => {
                warn!(
                    attempt = attempt + 1,
                    "Request failed: {}. Retrying in {:.1}s...",
                    other,
                    delay.as_secs_f64()
                );
            }
        }
        self.clock.sleep(delay).await;
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    ///
    /// Returns `Ok(None)` when the budget runs out on rate limiting or
    /// transport failures, and `Err` for client errors or a server error on
    /// the final attempt.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> std::result::Result<Option<T>, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchError>>,
    {
        let max_retries = self.config.max_retries;
        for attempt in 0..max_retries {
            let last_attempt = attempt + 1 >= max_retries;
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} attempts", attempt + 1);
                    }
                    return Ok(Some(value));
                }
                Err(error) => match error.kind() {
                    FailureKind::Client => {
                        debug!("Non-retryable error: {}", error);
                        return Err(error);
                    }
                    FailureKind::RateLimited => {
                        self.backoff(attempt, &error).await;
                    }
                    FailureKind::Server => {
                        if last_attempt {
                            warn!("Max retries ({}) exceeded. Last error: {}", max_retries, error);
                            return Err(error);
                        }
                        self.backoff(attempt, &error).await;
                    }
                    FailureKind::Transport => {
                        if last_attempt {
                            warn!("All {} retries failed: {}", max_retries, error);
                            return Ok(None);
                        }
                        self.backoff(attempt, &error).await;
                    }
                },
            }
        }
        debug!("Attempt budget of {} spent while rate limited", max_retries);
        Ok(None)
    }
}

/// Retry `operation` with `backoff_factor^attempt` second waits.
///
/// `max_retries` is the total number of attempts; values below 1 are treated
/// as 1. `backoff_factor` is expected to be greater than 1.
pub async fn fetch_with_retry<F, Fut, T>(
    operation: F,
    max_retries: usize,
    backoff_factor: f64,
) -> std::result::Result<Option<T>, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, FetchError>>,
{
    debug_assert!(backoff_factor > 1.0, "backoff_factor must exceed 1");
    let retrier = BackoffRetrier {
        config: RetryConfig {
            max_retries: max_retries.max(1),
            backoff_factor,
            ..RetryConfig::default()
        },
        clock: default_clock(),
    };
    retrier.run(operation).await
}

/// Builder for retry operations
pub struct RetryBuilder {
    config: RetryConfig,
    clock: SharedClock,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
            clock: default_clock(),
        }
    }

    pub fn max_retries(mut self, max: usize) -> Self {
        self.config.max_retries = max;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay_secs = delay.as_secs_f64();
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay_secs = Some(delay.as_secs_f64());
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<BackoffRetrier> {
        BackoffRetrier::with_clock(self.config, self.clock)
    }
}
