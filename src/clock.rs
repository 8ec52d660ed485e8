//! Time source consumed by the governance components
//!
//! Every component reads `now` and suspends through a [`Clock`], so the whole
//! toolkit follows the runtime timer. With tokio's `test-util` feature the
//! default [`TokioClock`] can be paused and advanced deterministically.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source with a cooperative sleep primitive.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Suspend the calling task without blocking the executor.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Shared handle used by components.
pub type SharedClock = Arc<dyn Clock>;

pub fn default_clock() -> SharedClock {
    Arc::new(TokioClock)
}
