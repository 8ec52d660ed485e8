//! Fixed-delay throttling
//!
//! Enforces a minimum spacing between consecutive admissions. The last
//! admission time is read, waited on and rewritten under one async mutex, so
//! overlapping callers are serialized in arrival order.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::{default_clock, SharedClock};
use crate::config::ThrottleConfig;
use crate::error::Result;

pub struct FixedDelayThrottler {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
    clock: SharedClock,
}

impl std::fmt::Debug for FixedDelayThrottler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedDelayThrottler")
            .field("delay", &self.delay)
            .finish()
    }
}

impl FixedDelayThrottler {
    pub fn new(delay: Duration) -> Self {
        Self::with_clock(delay, default_clock())
    }

    pub fn with_clock(delay: Duration, clock: SharedClock) -> Self {
        Self {
            delay,
            last_request: Mutex::new(None),
            clock,
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        Ok(Self::new(config.delay()?))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Suspend until `delay` has passed since the previous admission, then
    /// stamp the new admission. The first call never waits.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.delay {
                let remaining = self.delay - elapsed;
                debug!("Throttling for {:.3}s", remaining.as_secs_f64());
                self.clock.sleep(remaining).await;
            }
        }
        *last = Some(self.clock.now());
    }
}
