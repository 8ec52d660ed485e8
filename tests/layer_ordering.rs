//! Tests for the canonical governance stack.
//!
//! Probe layers record their entry/exit points to verify the execution order
//! Cache → RateLimit → Timeout → Retry → Base, and scripted backends check how
//! the layers cooperate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};
use tower_governance::resilience::{CacheLayer, RateLimitLayer, RetryLayer, TimeoutLayer};
use tower_governance::{FetchError, RetryBuilder, SlidingWindowRateLimiter};

/// Shared probe log to record layer entry/exit
type ProbeLog = Arc<Mutex<VecDeque<String>>>;

#[derive(Clone)]
struct ProbeLayer {
    scope: &'static str,
    log: ProbeLog,
}

impl ProbeLayer {
    fn new(scope: &'static str, log: ProbeLog) -> Self {
        Self { scope, log }
    }
}

#[derive(Clone)]
struct Probe<S> {
    inner: S,
    scope: &'static str,
    log: ProbeLog,
}

impl<S> Layer<S> for ProbeLayer {
    type Service = Probe<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Probe {
            inner,
            scope: self.scope,
            log: self.log.clone(),
        }
    }
}

impl<S, Req> Service<Req> for Probe<S>
where
    S: Service<Req> + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<S::Response, S::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.log
            .lock()
            .unwrap()
            .push_back(format!("{}_enter", self.scope));
        let fut = self.inner.call(req);
        let scope = self.scope;
        let log = self.log.clone();
        Box::pin(async move {
            let out = fut.await;
            log.lock().unwrap().push_back(format!("{}_exit", scope));
            out
        })
    }
}

fn retrier(max_retries: usize) -> tower_governance::BackoffRetrier {
    RetryBuilder::new()
        .max_retries(max_retries)
        .backoff_factor(2.0)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_canonical_layer_ordering() {
    let log: ProbeLog = Arc::new(Mutex::new(VecDeque::new()));
    let limiter = Arc::new(SlidingWindowRateLimiter::new(10, Duration::from_secs(1)).unwrap());

    let base_log = log.clone();
    let base = service_fn(move |key: &'static str| {
        base_log.lock().unwrap().push_back("base".to_string());
        async move { Ok::<String, FetchError>(key.to_string()) }
    });

    let mut stack = ServiceBuilder::new()
        .layer(CacheLayer::<&'static str, String>::new(Duration::from_secs(60)))
        .layer(ProbeLayer::new("rate_limit", log.clone()))
        .layer(RateLimitLayer::new(limiter))
        .layer(ProbeLayer::new("timeout", log.clone()))
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
        .layer(ProbeLayer::new("retry", log.clone()))
        .layer(RetryLayer::new(retrier(3)))
        .service(base);

    let out = stack.ready().await.unwrap().call("k").await.unwrap();
    assert_eq!(out.as_deref(), Some("k"));

    let execution_log: Vec<String> = log.lock().unwrap().iter().cloned().collect();
    assert_eq!(
        execution_log,
        vec![
            "rate_limit_enter",
            "timeout_enter",
            "retry_enter",
            "base",
            "retry_exit",
            "timeout_exit",
            "rate_limit_exit",
        ]
    );

    // A cache hit never reaches the layers below the cache.
    log.lock().unwrap().clear();
    let out = stack.ready().await.unwrap().call("k").await.unwrap();
    assert_eq!(out.as_deref(), Some("k"));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_inside_cache_recovers_and_memoizes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_calls = calls.clone();
    let base = service_fn(move |key: &'static str| {
        let n = backend_calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(FetchError::Server { status: 503 })
            } else {
                Ok(format!("{key}:{n}"))
            }
        }
    });

    let mut stack = ServiceBuilder::new()
        .layer(CacheLayer::<&'static str, String>::new(Duration::from_secs(60)))
        .layer(RetryLayer::new(retrier(3)))
        .service(base);

    let start = Instant::now();
    let first = stack.ready().await.unwrap().call("a").await.unwrap();
    assert_eq!(first.as_deref(), Some("a:2"));
    assert_eq!(Instant::now() - start, Duration::from_secs(3));

    let second = stack.ready().await.unwrap().call("a").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_outside_retry_bounds_total_time() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_calls = calls.clone();
    let base = service_fn(move |_: ()| {
        backend_calls.fetch_add(1, Ordering::SeqCst);
        async move { Err::<(), _>(FetchError::transport("connection reset")) }
    });

    let mut stack = ServiceBuilder::new()
        .layer(TimeoutLayer::new(Duration::from_secs(2)))
        .layer(RetryLayer::new(retrier(5)))
        .service(base);

    let start = Instant::now();
    let err = stack.ready().await.unwrap().call(()).await.unwrap_err();
    assert_eq!(err, FetchError::Timeout(Duration::from_secs(2)));
    assert_eq!(Instant::now() - start, Duration::from_secs(2));
    // attempts at 0s and 1s; the next one would start at 3s
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_inside_retry_bounds_each_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_calls = calls.clone();
    let base = service_fn(move |_: ()| {
        let n = backend_calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok::<_, FetchError>(n)
        }
    });

    let mut stack = ServiceBuilder::new()
        .layer(RetryLayer::new(retrier(3)))
        .layer(TimeoutLayer::new(Duration::from_secs(2)))
        .service(base);

    let start = Instant::now();
    let out = stack.ready().await.unwrap().call(()).await.unwrap();
    // the slow first attempt is cut at 2s and retried after a 1s backoff
    assert_eq!(out, Some(1));
    assert_eq!(Instant::now() - start, Duration::from_secs(3));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_passes_through_stack_uncached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_calls = calls.clone();
    let base = service_fn(move |_: u8| {
        backend_calls.fetch_add(1, Ordering::SeqCst);
        async move { Err::<String, _>(FetchError::from_status(403).unwrap()) }
    });

    let mut stack = ServiceBuilder::new()
        .layer(CacheLayer::<u8, String>::new(Duration::from_secs(60)))
        .layer(RetryLayer::new(retrier(3)))
        .service(base);

    for expected in 1..=2 {
        let err = stack.ready().await.unwrap().call(1).await.unwrap_err();
        assert!(matches!(err, FetchError::Client { status: 403, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_across_clones() {
    let limiter = Arc::new(SlidingWindowRateLimiter::new(2, Duration::from_secs(1)).unwrap());
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let base_stamps = stamps.clone();
    let base = service_fn(move |n: u32| {
        base_stamps.lock().unwrap().push(Instant::now());
        async move { Ok::<u32, FetchError>(n) }
    });

    let stack = ServiceBuilder::new()
        .layer(RateLimitLayer::new(limiter))
        .service(base);

    let mut handles = Vec::new();
    for n in 0..6 {
        let svc = stack.clone();
        handles.push(tokio::spawn(async move { svc.oneshot(n).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let mut times = stamps.lock().unwrap().clone();
    times.sort();
    assert_eq!(times.len(), 6);
    for (i, t) in times.iter().enumerate() {
        let in_window = times[i..]
            .iter()
            .take_while(|u| **u < *t + Duration::from_secs(1))
            .count();
        assert!(in_window <= 2);
    }
}
