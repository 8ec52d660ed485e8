//! Configuration system for request governance
//!
//! Durations are expressed as fractional seconds so configuration files stay
//! readable (`period_secs = 60.0`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GovernanceError, Result};

/// Top-level governance configuration. Every section is optional; an absent
/// section leaves that governor out of the stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Sliding-window rate limit
    pub rate_limit: Option<RateLimitConfig>,

    /// Minimum spacing between requests
    pub throttle: Option<ThrottleConfig>,

    /// Retry with exponential backoff
    pub retry: Option<RetryConfig>,

    /// Bound on each attempt
    pub timeout: Option<TimeoutConfig>,

    /// Response memoization
    pub cache: Option<CacheConfig>,
}

/// Sliding-window rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    pub max_requests: usize,

    /// Window length in seconds
    pub period_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            period_secs: 60.0,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Result<Duration> {
        positive_duration("period_secs", self.period_secs)
    }
}

/// Fixed-delay throttle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub delay_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { delay_secs: 1.0 }
    }
}

impl ThrottleConfig {
    pub fn delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.delay_secs).map_err(|_| {
            GovernanceError::invalid(format!(
                "delay_secs must be a non-negative number of seconds, got {}",
                self.delay_secs
            ))
        })
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_retries: usize,

    /// Exponential backoff multiplier
    pub backoff_factor: f64,

    /// Delay unit multiplied by `backoff_factor^attempt`
    pub base_delay_secs: f64,

    /// Upper bound on a single wait
    pub max_delay_secs: Option<f64>,

    /// Add up to 30% random jitter to each wait
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            base_delay_secs: 1.0,
            max_delay_secs: None,
            jitter: false,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub timeout_secs: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { timeout_secs: 5.0 }
    }
}

impl TimeoutConfig {
    pub fn timeout(&self) -> Result<Duration> {
        positive_duration("timeout_secs", self.timeout_secs)
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds
    pub ttl_secs: f64,

    /// Allow at most one in-flight fetch per key
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300.0,
            single_flight: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Result<Duration> {
        positive_duration("ttl_secs", self.ttl_secs)
    }
}

/// Convert fractional seconds into a non-zero [`Duration`], rejecting NaN,
/// negative values and values too large to represent.
pub(crate) fn positive_duration(name: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(GovernanceError::invalid(format!(
            "{name} must be a positive number of seconds, got {secs}"
        ))),
    }
}

impl GovernanceConfig {
    /// Check every configured section against its component invariants.
    pub fn validate(&self) -> Result<()> {
        if let Some(rl) = &self.rate_limit {
            if rl.max_requests == 0 {
                return Err(GovernanceError::invalid("max_requests must be at least 1"));
            }
            rl.period()?;
        }
        if let Some(th) = &self.throttle {
            th.delay()?;
        }
        if let Some(retry) = &self.retry {
            if retry.max_retries == 0 {
                return Err(GovernanceError::invalid("max_retries must be at least 1"));
            }
            if !(retry.backoff_factor.is_finite() && retry.backoff_factor > 1.0) {
                return Err(GovernanceError::invalid(format!(
                    "backoff_factor must be greater than 1, got {}",
                    retry.backoff_factor
                )));
            }
            positive_duration("base_delay_secs", retry.base_delay_secs)?;
            if let Some(max) = retry.max_delay_secs {
                positive_duration("max_delay_secs", max)?;
            }
        }
        if let Some(t) = &self.timeout {
            t.timeout()?;
        }
        if let Some(c) = &self.cache {
            c.ttl()?;
        }
        Ok(())
    }
}

/// Configuration builder
pub struct ConfigBuilder {
    config: GovernanceConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GovernanceConfig::default(),
        }
    }

    pub fn rate_limit(mut self, max_requests: usize, period: Duration) -> Self {
        self.config.rate_limit = Some(RateLimitConfig {
            max_requests,
            period_secs: period.as_secs_f64(),
        });
        self
    }

    pub fn throttle(mut self, delay: Duration) -> Self {
        self.config.throttle = Some(ThrottleConfig {
            delay_secs: delay.as_secs_f64(),
        });
        self
    }

    pub fn retry(mut self, max_retries: usize, backoff_factor: f64) -> Self {
        let retry = self.config.retry.get_or_insert_with(RetryConfig::default);
        retry.max_retries = max_retries;
        retry.backoff_factor = backoff_factor;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        let retry = self.config.retry.get_or_insert_with(RetryConfig::default);
        retry.base_delay_secs = delay.as_secs_f64();
        self
    }

    pub fn retry_jitter(mut self, enabled: bool) -> Self {
        let retry = self.config.retry.get_or_insert_with(RetryConfig::default);
        retry.jitter = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(TimeoutConfig {
            timeout_secs: timeout.as_secs_f64(),
        });
        self
    }

    pub fn cache(mut self, ttl: Duration) -> Self {
        let cache = self.config.cache.get_or_insert_with(CacheConfig::default);
        cache.ttl_secs = ttl.as_secs_f64();
        self
    }

    pub fn single_flight(mut self, enabled: bool) -> Self {
        let cache = self.config.cache.get_or_insert_with(CacheConfig::default);
        cache.single_flight = enabled;
        self
    }

    pub fn build(self) -> Result<GovernanceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Load configuration from `GOVERNANCE_*` environment variables.
///
/// A section is enabled when any of its variables is set; unparsable values
/// are ignored.
pub fn from_env() -> Result<GovernanceConfig> {
    from_lookup(|name| std::env::var(name).ok())
}

/// Build configuration from `GOVERNANCE_*` names resolved through `lookup`.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<GovernanceConfig> {
    let f64_var = |name: &str| lookup(name).and_then(|v| v.trim().parse::<f64>().ok());
    let usize_var = |name: &str| lookup(name).and_then(|v| v.trim().parse::<usize>().ok());
    let bool_var = |name: &str| lookup(name).map(|v| parse_bool(&v));

    let mut config = GovernanceConfig::default();

    let max_requests = usize_var("GOVERNANCE_RATE_LIMIT_MAX_REQUESTS");
    let period = f64_var("GOVERNANCE_RATE_LIMIT_PERIOD_SECS");
    if max_requests.is_some() || period.is_some() {
        let defaults = RateLimitConfig::default();
        config.rate_limit = Some(RateLimitConfig {
            max_requests: max_requests.unwrap_or(defaults.max_requests),
            period_secs: period.unwrap_or(defaults.period_secs),
        });
    }

    if let Some(delay_secs) = f64_var("GOVERNANCE_THROTTLE_DELAY_SECS") {
        config.throttle = Some(ThrottleConfig { delay_secs });
    }

    let max_retries = usize_var("GOVERNANCE_RETRY_MAX_RETRIES");
    let backoff = f64_var("GOVERNANCE_RETRY_BACKOFF_FACTOR");
    let base_delay = f64_var("GOVERNANCE_RETRY_BASE_DELAY_SECS");
    let max_delay = f64_var("GOVERNANCE_RETRY_MAX_DELAY_SECS");
    let jitter = bool_var("GOVERNANCE_RETRY_JITTER");
    if max_retries.is_some()
        || backoff.is_some()
        || base_delay.is_some()
        || max_delay.is_some()
        || jitter.is_some()
    {
        let defaults = RetryConfig::default();
        config.retry = Some(RetryConfig {
            max_retries: max_retries.unwrap_or(defaults.max_retries),
            backoff_factor: backoff.unwrap_or(defaults.backoff_factor),
            base_delay_secs: base_delay.unwrap_or(defaults.base_delay_secs),
            max_delay_secs: max_delay.or(defaults.max_delay_secs),
            jitter: jitter.unwrap_or(defaults.jitter),
        });
    }

    if let Some(timeout_secs) = f64_var("GOVERNANCE_TIMEOUT_SECS") {
        config.timeout = Some(TimeoutConfig { timeout_secs });
    }

    let ttl = f64_var("GOVERNANCE_CACHE_TTL_SECS");
    let single_flight = bool_var("GOVERNANCE_CACHE_SINGLE_FLIGHT");
    if ttl.is_some() || single_flight.is_some() {
        let defaults = CacheConfig::default();
        config.cache = Some(CacheConfig {
            ttl_secs: ttl.unwrap_or(defaults.ttl_secs),
            single_flight: single_flight.unwrap_or(defaults.single_flight),
        });
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file
pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<GovernanceConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: GovernanceConfig = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}
