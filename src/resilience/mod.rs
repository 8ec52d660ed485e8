//! Resilience layers: cache, rate-limit, throttle, timeout, retry
//!
//! Tower middleware exposing each governance component around any
//! `Service<Req, Error = FetchError>`.
//!
//! Layers
//! - `CacheLayer` memoizes `Some` responses per request (the request is the key)
//! - `RateLimitLayer` waits on a shared [`SlidingWindowRateLimiter`]
//! - `ThrottleLayer` waits on a shared [`FixedDelayThrottler`]
//! - `TimeoutLayer` fails with `FetchError::Timeout` when the inner call is too slow
//! - `RetryLayer` re-issues the request through a [`BackoffRetrier`] and yields `Option<Response>`
//!
//! Composition
//! - The canonical order, outermost first, is Cache → RateLimit/Throttle → Timeout → Retry:
//!   `ServiceBuilder::new().layer(CacheLayer::new(ttl)).layer(RateLimitLayer::new(limiter))
//!   .layer(TimeoutLayer::new(dur)).layer(RetryLayer::new(retrier)).service(fetch)`
//!
//! Services that wait before reaching the inner service keep it behind an
//! `Arc<Mutex<S>>`; the lock is only held to drive readiness and start the
//! call, never while the response is awaited.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tower::{Layer, Service, ServiceExt};

use crate::cache::{CacheMiss, TtlCache};
use crate::error::FetchError;
use crate::rate_limit::SlidingWindowRateLimiter;
use crate::retry::BackoffRetrier;
use crate::throttle::FixedDelayThrottler;
use crate::timeout::{run_with_timeout, TimeoutOutcome};

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send>>;

async fn call_shared<S, Req>(inner: Arc<Mutex<S>>, req: Req) -> Result<S::Response, FetchError>
where
    S: Service<Req, Error = FetchError>,
{
    let fut = {
        let mut guard = inner.lock().await;
        ServiceExt::ready(&mut *guard).await?.call(req)
    };
    fut.await
}

// ===== Rate limit =====

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowRateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<SlidingWindowRateLimiter>) -> Self {
        Self { limiter }
    }
}

pub struct RateLimit<S> {
    inner: Arc<Mutex<S>>,
    limiter: Arc<SlidingWindowRateLimiter>,
}

impl<S> Clone for RateLimit<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimit<S>;
    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner: Arc::new(Mutex::new(inner)),
            limiter: self.limiter.clone(),
        }
    }
}

impl<S, Req> Service<Req> for RateLimit<S>
where
    Req: Send + 'static,
    S: Service<Req, Error = FetchError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = FetchError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            limiter.wait_if_needed().await;
            call_shared(inner, req).await
        })
    }
}

// ===== Throttle =====

#[derive(Clone)]
pub struct ThrottleLayer {
    throttler: Arc<FixedDelayThrottler>,
}

impl ThrottleLayer {
    pub fn new(throttler: Arc<FixedDelayThrottler>) -> Self {
        Self { throttler }
    }
}

pub struct Throttle<S> {
    inner: Arc<Mutex<S>>,
    throttler: Arc<FixedDelayThrottler>,
}

impl<S> Clone for Throttle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            throttler: self.throttler.clone(),
        }
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = Throttle<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Throttle {
            inner: Arc::new(Mutex::new(inner)),
            throttler: self.throttler.clone(),
        }
    }
}

impl<S, Req> Service<Req> for Throttle<S>
where
    Req: Send + 'static,
    S: Service<Req, Error = FetchError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = FetchError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let throttler = self.throttler.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            throttler.wait().await;
            call_shared(inner, req).await
        })
    }
}

// ===== Timeout =====

#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    dur: Duration,
}

impl TimeoutLayer {
    pub fn new(dur: Duration) -> Self {
        Self { dur }
    }
}

#[derive(Clone)]
pub struct Timeout<S> {
    inner: S,
    dur: Duration,
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            dur: self.dur,
        }
    }
}

impl<S, Req> Service<Req> for Timeout<S>
where
    S: Service<Req, Error = FetchError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = FetchError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let fut = self.inner.call(req);
        let dur = self.dur;
        Box::pin(async move {
            match run_with_timeout(fut, dur).await {
                TimeoutOutcome::Completed(r) => r,
                TimeoutOutcome::TimedOut { after } => Err(FetchError::Timeout(after)),
            }
        })
    }
}

// ===== Retry =====

#[derive(Debug, Clone)]
pub struct RetryLayer {
    retrier: BackoffRetrier,
}

impl RetryLayer {
    pub fn new(retrier: BackoffRetrier) -> Self {
        Self { retrier }
    }
}

pub struct Retry<S> {
    inner: Arc<Mutex<S>>,
    retrier: BackoffRetrier,
}

impl<S> Clone for Retry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            retrier: self.retrier.clone(),
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner: Arc::new(Mutex::new(inner)),
            retrier: self.retrier.clone(),
        }
    }
}

impl<S, Req> Service<Req> for Retry<S>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = FetchError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = Option<S::Response>;
    type Error = FetchError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let retrier = self.retrier.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            retrier
                .run(move || call_shared(inner.clone(), req.clone()))
                .await
        })
    }
}

// ===== Cache =====

/// Caches `Some` responses of a fetch-shaped service, keyed by request.
pub struct CacheLayer<Req, T> {
    cache: Arc<TtlCache<Req, T>>,
}

impl<Req, T> Clone for CacheLayer<Req, T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<Req, T> CacheLayer<Req, T>
where
    Req: Hash + Eq + Clone + Debug,
    T: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::shared(Arc::new(TtlCache::new(ttl)))
    }

    pub fn shared(cache: Arc<TtlCache<Req, T>>) -> Self {
        Self { cache }
    }
}

pub struct Cache<S, Req, T> {
    inner: Arc<Mutex<S>>,
    cache: Arc<TtlCache<Req, T>>,
}

impl<S, Req, T> Clone for Cache<S, Req, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S, Req, T> Layer<S> for CacheLayer<Req, T> {
    type Service = Cache<S, Req, T>;
    fn layer(&self, inner: S) -> Self::Service {
        Cache {
            inner: Arc::new(Mutex::new(inner)),
            cache: self.cache.clone(),
        }
    }
}

impl<S, Req, T> Service<Req> for Cache<S, Req, T>
where
    Req: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: Service<Req, Response = Option<T>, Error = FetchError> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Option<T>;
    type Error = FetchError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let cache = self.cache.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let key = req.clone();
            let result = cache
                .get(key, move || async move {
                    CacheMiss::from_outcome(call_shared(inner, req).await)
                })
                .await;
            CacheMiss::resolve(result)
        })
    }
}
