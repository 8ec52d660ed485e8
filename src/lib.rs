//! # Tower Governance
//!
//! Small, composable utilities for calling a rate-limited, unreliable, slow
//! remote service from async Rust.
//!
//! ## Core Concepts
//!
//! - **Operation**: any `FnMut() -> impl Future<Output = Result<T, FetchError>>`.
//!   Failures are classified by [`FetchError`] as rate limited, server, client
//!   or transport errors.
//! - **Governors**: [`SlidingWindowRateLimiter`], [`FixedDelayThrottler`],
//!   [`BackoffRetrier`], [`run_with_timeout`] and [`TtlCache`], each usable alone.
//! - **Composition**: [`Governor`] applies them in the order
//!   cache → rate limit/throttle → timeout → retry → operation, with the
//!   timeout bounding each attempt the retrier makes. The [`resilience`]
//!   module offers the same pieces as Tower layers.
//! - **Static configuration**: everything is configured through explicit
//!   values ([`GovernanceConfig`]); there are no process-wide singletons.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tower_governance::{fetch_with_retry, FetchError, SlidingWindowRateLimiter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let limiter = SlidingWindowRateLimiter::new(5, Duration::from_secs(1))?;
//!
//! limiter.wait_if_needed().await;
//! let body = fetch_with_retry(
//!     || async {
//!         // perform the request and classify its status
//!         match 503 {
//!             200 => Ok("payload".to_string()),
//!             status => Err(FetchError::from_status(status)
//!                 .unwrap_or_else(|| FetchError::transport("unexpected status"))),
//!         }
//!     },
//!     3,
//!     2.0,
//! )
//! .await?;
//!
//! println!("Response: {:?}", body);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod governor;
pub mod rate_limit;
pub mod resilience;
pub mod retry;
pub mod throttle;
pub mod timeout;

pub use cache::TtlCache;
pub use clock::{Clock, SharedClock, TokioClock};
pub use config::{
    CacheConfig, ConfigBuilder, GovernanceConfig, RateLimitConfig, RetryConfig, ThrottleConfig,
    TimeoutConfig,
};
pub use error::{FailureKind, FetchError, GovernanceError, Result};
pub use governor::Governor;
pub use rate_limit::SlidingWindowRateLimiter;
pub use retry::{fetch_with_retry, BackoffRetrier, RetryBuilder};
pub use throttle::FixedDelayThrottler;
pub use timeout::{fetch_with_timeout, run_with_timeout, run_with_timeout_on, TimeoutOutcome};

// Re-export Tower traits that users need
pub use tower::{Layer, Service, ServiceExt};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        let _ = std::mem::size_of::<GovernanceError>();
        let _ = std::mem::size_of::<FetchError>();
    }
}
