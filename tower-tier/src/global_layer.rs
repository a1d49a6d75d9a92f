use std::fmt;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tracing::debug;

use tier_limit::GlobalLimiter;

use crate::error::TierError;
use crate::service::ResponseFuture;

type OverflowFn = Arc<dyn Fn() + Send + Sync>;

/// Caps the number of requests in flight across every clone of the service.
///
/// An admitted request holds its slot until the inner future completes or is
/// dropped. Excess requests invoke the overflow callback, if any, and fail
/// with `TierError::Overloaded`.
#[derive(Clone)]
pub struct GlobalLimitLayer {
    limiter: Arc<GlobalLimiter>,
    on_overflow: Option<OverflowFn>,
}

impl GlobalLimitLayer {
    pub fn new(max: u64) -> Self {
        Self::with_limiter(Arc::new(GlobalLimiter::new(max)))
    }

    pub fn with_limiter(limiter: Arc<GlobalLimiter>) -> Self {
        Self {
            limiter,
            on_overflow: None,
        }
    }

    /// Invoke `f` for every request shed by the limiter.
    pub fn on_overflow<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_overflow = Some(Arc::new(f));
        self
    }

    pub fn limiter(&self) -> &Arc<GlobalLimiter> {
        &self.limiter
    }
}

impl fmt::Debug for GlobalLimitLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalLimitLayer")
            .field("limiter", &self.limiter)
            .field("on_overflow", &self.on_overflow.is_some())
            .finish()
    }
}

impl<S> Layer<S> for GlobalLimitLayer {
    type Service = GlobalLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GlobalLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            on_overflow: self.on_overflow.clone(),
            overflow: global::meter("tower_tier")
                .u64_counter("tier_global_overflow")
                .build(),
        }
    }
}

#[derive(Clone)]
pub struct GlobalLimitService<S> {
    inner: S,
    limiter: Arc<GlobalLimiter>,
    on_overflow: Option<OverflowFn>,
    overflow: Counter<u64>,
}

impl<S: fmt::Debug> fmt::Debug for GlobalLimitService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalLimitService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl<S, Req> Service<Req> for GlobalLimitService<S>
where
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        match self.limiter.try_acquire() {
            Some(guard) => ResponseFuture::new(self.inner.call(req), Some(guard)),
            None => {
                debug!(
                    in_flight = self.limiter.in_flight(),
                    max = self.limiter.max(),
                    "request shed"
                );
                self.overflow.add(1, &[]);
                if let Some(f) = &self.on_overflow {
                    f();
                }
                ResponseFuture::rejected(TierError::Overloaded)
            }
        }
    }
}
