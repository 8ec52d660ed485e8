//! Composed request governance
//!
//! [`Governor`] applies the configured components around a fetch operation in
//! the canonical order: cache, then rate limiter and throttler, then timeout,
//! then retry, then the operation itself. Any component may be absent.
//!
//! The timeout bounds a single attempt. An attempt that overruns it fails
//! with [`FetchError::Timeout`], which the retrier treats like any other
//! transport failure: it backs off and tries again, and a timeout on the last
//! attempt ends the call with `Ok(None)`.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tower_governance::{ConfigBuilder, FetchError, Governor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigBuilder::new()
//!     .cache(Duration::from_secs(60))
//!     .rate_limit(10, Duration::from_secs(1))
//!     .timeout(Duration::from_secs(5))
//!     .retry(3, 2.0)
//!     .build()?;
//! let governor: Governor<String, String> = Governor::from_config(&config)?;
//!
//! let body = governor
//!     .fetch("user:1".to_string(), || async {
//!         Ok::<_, FetchError>("{\"id\": 1}".to_string())
//!     })
//!     .await?;
//! assert!(body.is_some());
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::cache::{CacheMiss, TtlCache};
use crate::clock::{default_clock, SharedClock};
use crate::config::GovernanceConfig;
use crate::error::{FetchError, GovernanceError, Result};
use crate::rate_limit::SlidingWindowRateLimiter;
use crate::retry::BackoffRetrier;
use crate::throttle::FixedDelayThrottler;
use crate::timeout::{run_with_timeout_on, TimeoutOutcome};

pub struct Governor<K, V> {
    cache: Option<TtlCache<K, V>>,
    rate_limiter: Option<SlidingWindowRateLimiter>,
    throttler: Option<FixedDelayThrottler>,
    timeout: Option<Duration>,
    retrier: Option<BackoffRetrier>,
    clock: SharedClock,
}

impl<K, V> Debug for Governor<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("cache", &self.cache)
            .field("rate_limiter", &self.rate_limiter)
            .field("throttler", &self.throttler)
            .field("timeout", &self.timeout)
            .field("retrier", &self.retrier)
            .finish()
    }
}

impl<K, V> Default for Governor<K, V> {
    fn default() -> Self {
        Self {
            cache: None,
            rate_limiter: None,
            throttler: None,
            timeout: None,
            retrier: None,
            clock: default_clock(),
        }
    }
}

impl<K, V> Governor<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    /// A governor with no components; `fetch` calls the operation once.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GovernanceConfig) -> Result<Self> {
        config.validate()?;
        let mut governor = Self::new();
        if let Some(cache) = &config.cache {
            governor.cache = Some(TtlCache::from_config(cache)?);
        }
        if let Some(rate_limit) = &config.rate_limit {
            governor.rate_limiter = Some(SlidingWindowRateLimiter::from_config(rate_limit)?);
        }
        if let Some(throttle) = &config.throttle {
            governor.throttler = Some(FixedDelayThrottler::from_config(throttle)?);
        }
        if let Some(timeout) = &config.timeout {
            governor.timeout = Some(timeout.timeout()?);
        }
        if let Some(retry) = &config.retry {
            governor.retrier = Some(BackoffRetrier::new(retry.clone())?);
        }
        Ok(governor)
    }

    pub fn with_cache(mut self, cache: TtlCache<K, V>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: SlidingWindowRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_throttler(mut self, throttler: FixedDelayThrottler) -> Self {
        self.throttler = Some(throttler);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(GovernanceError::invalid("timeout must be positive"));
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    pub fn with_retrier(mut self, retrier: BackoffRetrier) -> Self {
        self.retrier = Some(retrier);
        self
    }

    /// Clock measuring the per-attempt timeout.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> Option<&TtlCache<K, V>> {
        self.cache.as_ref()
    }

    /// Run `operation` under every configured component.
    ///
    /// `Ok(None)` means "no result": the retry budget ran out on transport or
    /// rate-limit failures, or the timeout fired. Such outcomes are not cached.
    #[instrument(level = "debug", skip(self, operation))]
    pub async fn fetch<F, Fut>(
        &self,
        key: K,
        mut operation: F,
    ) -> std::result::Result<Option<V>, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<V, FetchError>>,
    {
        let Some(cache) = &self.cache else {
            return self.governed(&mut operation).await;
        };
        let operation = &mut operation;
        let result = cache
            .get(key, move || async move {
                CacheMiss::from_outcome(self.governed(operation).await)
            })
            .await;
        CacheMiss::resolve(result)
    }

    async fn governed<F, Fut>(&self, operation: &mut F) -> std::result::Result<Option<V>, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<V, FetchError>>,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait_if_needed().await;
        }
        if let Some(throttler) = &self.throttler {
            throttler.wait().await;
        }

        let limit = self.timeout;
        let clock = &self.clock;
        let mut attempt = || {
            let call = operation();
            async move {
                let Some(limit) = limit else {
                    return call.await;
                };
                match run_with_timeout_on(&**clock, call, limit).await {
                    TimeoutOutcome::Completed(result) => result,
                    TimeoutOutcome::TimedOut { after } => {
                        debug!("Attempt abandoned after {:?}", after);
                        Err(FetchError::Timeout(after))
                    }
                }
            }
        };

        match &self.retrier {
            Some(retrier) => retrier.run(&mut attempt).await,
            None => match attempt().await {
                Ok(value) => Ok(Some(value)),
                Err(FetchError::Timeout(_)) => Ok(None),
                Err(error) => Err(error),
            },
        }
    }
}
