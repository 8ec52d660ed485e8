//! Sliding-window rate limiting
//!
//! [`SlidingWindowRateLimiter`] admits at most `max_requests` requests in any
//! trailing `period`. Admission timestamps live in a queue behind an async
//! mutex that is held across the whole check-wait-record step, so two tasks can
//! never both observe room and overshoot the limit. Tokio's mutex is fair, which
//! makes admissions FIFO in arrival order.
//!
//! ```rust
//! use std::time::Duration;
//! use tower_governance::SlidingWindowRateLimiter;
//!
//! # async fn example() -> tower_governance::Result<()> {
//! let limiter = SlidingWindowRateLimiter::new(10, Duration::from_secs(60))?;
//! limiter.wait_if_needed().await;
//! // ... issue the request
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::{default_clock, SharedClock};
use crate::config::RateLimitConfig;
use crate::error::{GovernanceError, Result};

/// Bounds the number of admissions per rolling time window.
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    period: Duration,
    requests: Mutex<VecDeque<Instant>>,
    clock: SharedClock,
}

impl std::fmt::Debug for SlidingWindowRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowRateLimiter")
            .field("max_requests", &self.max_requests)
            .field("period", &self.period)
            .finish()
    }
}

impl SlidingWindowRateLimiter {
    /// Create a limiter admitting `max_requests` per `period`.
    ///
    /// Both values must be positive.
    pub fn new(max_requests: usize, period: Duration) -> Result<Self> {
        Self::with_clock(max_requests, period, default_clock())
    }

    pub fn with_clock(max_requests: usize, period: Duration, clock: SharedClock) -> Result<Self> {
        if max_requests == 0 {
            return Err(GovernanceError::invalid("max_requests must be at least 1"));
        }
        if period.is_zero() {
            return Err(GovernanceError::invalid("period must be positive"));
        }
        Ok(Self {
            max_requests,
            period,
            requests: Mutex::new(VecDeque::with_capacity(max_requests)),
            clock,
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        Self::new(config.max_requests, config.period()?)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Drop timestamps that no longer fall inside the window ending at `now`.
    fn evict(requests: &mut VecDeque<Instant>, now: Instant, period: Duration) {
        while let Some(oldest) = requests.front() {
            if *oldest + period <= now {
                requests.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the oldest admission leaves the window.
    fn wait_for(requests: &VecDeque<Instant>, now: Instant, period: Duration) -> Duration {
        requests
            .front()
            .map(|oldest| (*oldest + period).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Suspend until one more request fits in the window, then record it.
    pub async fn wait_if_needed(&self) {
        let mut requests = self.requests.lock().await;
        loop {
            let now = self.clock.now();
            Self::evict(&mut requests, now, self.period);

            if requests.len() < self.max_requests {
                requests.push_back(now);
                return;
            }

            let wait = Self::wait_for(&requests, now, self.period);
            debug!(
                in_window = requests.len(),
                max_requests = self.max_requests,
                "Rate limit reached. Waiting {:.1}s...",
                wait.as_secs_f64()
            );
            self.clock.sleep(wait).await;
        }
    }

    /// Admit immediately if there is room, otherwise return the wait that
    /// would be needed. Nothing is recorded on refusal.
    pub async fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut requests = self.requests.lock().await;
        let now = self.clock.now();
        Self::evict(&mut requests, now, self.period);
        if requests.len() < self.max_requests {
            requests.push_back(now);
            Ok(())
        } else {
            Err(Self::wait_for(&requests, now, self.period))
        }
    }

    /// Number of admissions still inside the current window.
    pub async fn in_window(&self) -> usize {
        let mut requests = self.requests.lock().await;
        Self::evict(&mut requests, self.clock.now(), self.period);
        requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rejects_zero_parameters() {
        assert!(SlidingWindowRateLimiter::new(0, Duration::from_secs(1)).is_err());
        assert!(SlidingWindowRateLimiter::new(1, Duration::ZERO).is_err());
        let bad = RateLimitConfig {
            max_requests: 2,
            period_secs: -1.0,
        };
        assert!(SlidingWindowRateLimiter::from_config(&bad).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_without_waiting() {
        let limiter = SlidingWindowRateLimiter::new(3, Duration::from_secs(10)).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            limiter.wait_if_needed().await;
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_oldest_to_leave_window() {
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_secs(10)).unwrap();
        let start = Instant::now();
        limiter.wait_if_needed().await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        limiter.wait_if_needed().await;

        limiter.wait_if_needed().await;
        assert_eq!(Instant::now() - start, Duration::from_secs(10));

        limiter.wait_if_needed().await;
        assert_eq!(Instant::now() - start, Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_reports_wait() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(5)).unwrap();
        assert!(limiter.try_acquire().await.is_ok());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.try_acquire().await, Err(Duration::from_secs(3)));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(limiter.try_acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_window() {
        let limiter = Arc::new(SlidingWindowRateLimiter::new(3, Duration::from_secs(1)).unwrap());
        let admissions = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let admissions = admissions.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait_if_needed().await;
                admissions.lock().unwrap().push(Instant::now());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut times = admissions.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 10);
        for (i, t) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|u| **u < *t + Duration::from_secs(1))
                .count();
            assert!(in_window <= 3, "{in_window} admissions within one period");
        }
    }
}
