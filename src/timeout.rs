//! Timeout protection for single operations
//!
//! The guarded future is dropped when the deadline passes, so the operation
//! is fully cancelled by the time the caller sees the timeout. The deadline is
//! measured with a [`Clock`]; [`run_with_timeout`] uses the tokio timer.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::clock::{Clock, TokioClock};
use crate::error::FetchError;

/// Outcome of [`run_with_timeout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome<T> {
    /// The operation finished in time with this output
    Completed(T),
    /// The operation was cancelled after this long
    TimedOut { after: Duration },
}

impl<T> TimeoutOutcome<T> {
    pub fn timed_out(&self) -> bool {
        matches!(self, TimeoutOutcome::TimedOut { .. })
    }

    /// Collapse a timeout into "no result".
    pub fn into_option(self) -> Option<T> {
        match self {
            TimeoutOutcome::Completed(value) => Some(value),
            TimeoutOutcome::TimedOut { .. } => None,
        }
    }
}

/// Run `operation`, cancelling it if it has not finished within `timeout`.
///
/// The operation's own output, including any error it carries, is returned
/// unchanged inside [`TimeoutOutcome::Completed`].
pub async fn run_with_timeout<Fut>(operation: Fut, timeout: Duration) -> TimeoutOutcome<Fut::Output>
where
    Fut: Future,
{
    run_with_timeout_on(&TokioClock, operation, timeout).await
}

/// [`run_with_timeout`] with the deadline taken from `clock`.
///
/// The operation is polled before the deadline, so an operation that is ready
/// when the deadline fires still completes.
pub async fn run_with_timeout_on<Fut>(
    clock: &dyn Clock,
    operation: Fut,
    timeout: Duration,
) -> TimeoutOutcome<Fut::Output>
where
    Fut: Future,
{
    tokio::select! {
        biased;
        output = operation => TimeoutOutcome::Completed(output),
        _ = clock.sleep(timeout) => {
            warn!("Request timed out after {:.1}s", timeout.as_secs_f64());
            TimeoutOutcome::TimedOut { after: timeout }
        }
    }
}

/// Fetch-shaped variant of [`run_with_timeout`]: a timeout becomes `Ok(None)`
/// and the operation's own errors propagate.
pub async fn fetch_with_timeout<Fut, T>(operation: Fut, timeout: Duration) -> Result<Option<T>, FetchError>
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    match run_with_timeout(operation, timeout).await {
        TimeoutOutcome::Completed(result) => result.map(Some),
        TimeoutOutcome::TimedOut { .. } => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ImmediateClock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out_at_deadline() {
        let start = Instant::now();
        let outcome = run_with_timeout(
            async {
                sleep(Duration::from_secs(10)).await;
                42
            },
            Duration::from_secs(5),
        )
        .await;

        assert!(outcome.timed_out());
        assert_eq!(outcome.into_option(), None);
        assert_eq!(Instant::now() - start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_operation_passes_through() {
        let outcome = run_with_timeout(
            async {
                sleep(Duration::from_secs(1)).await;
                Err::<(), _>(FetchError::Server { status: 500 })
            },
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(
            outcome,
            TimeoutOutcome::Completed(Err(FetchError::Server { status: 500 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_operation_does_not_finish() {
        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Flag(dropped.clone());
        let finished_clone = finished.clone();

        let outcome = run_with_timeout(
            async move {
                let _flag = flag;
                sleep(Duration::from_secs(10)).await;
                finished_clone.store(true, Ordering::SeqCst);
            },
            Duration::from_secs(2),
        )
        .await;

        assert!(outcome.timed_out());
        assert!(dropped.load(Ordering::SeqCst));
        sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn deadline_follows_the_supplied_clock() {
        let outcome = run_with_timeout_on(
            &ImmediateClock,
            std::future::pending::<()>(),
            Duration::from_secs(3600),
        )
        .await;
        assert_eq!(
            outcome,
            TimeoutOutcome::TimedOut {
                after: Duration::from_secs(3600)
            }
        );

        let ready = run_with_timeout_on(&ImmediateClock, async { 7 }, Duration::from_secs(1)).await;
        assert_eq!(ready, TimeoutOutcome::Completed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_with_timeout_flattens() {
        let ok = fetch_with_timeout(async { Ok::<_, FetchError>(7) }, Duration::from_secs(1)).await;
        assert_eq!(ok, Ok(Some(7)));

        let late = fetch_with_timeout(
            async {
                sleep(Duration::from_secs(3)).await;
                Ok::<_, FetchError>(7)
            },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(late, Ok(None));

        let failed = fetch_with_timeout(
            async { Err::<u8, _>(FetchError::transport("reset")) },
            Duration::from_secs(1),
        )
        .await;
        assert!(failed.is_err());
    }
}
