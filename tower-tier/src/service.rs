use std::fmt::Debug;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use tier_limit::InFlightGuard;
use tier_limit::Reason;
use tier_limit::Strategy;

use crate::error::TierError;
use crate::key::KeyExtractor;

#[derive(Clone, Debug)]
struct RuleServiceMetrics {
    rejected: Counter<u64>,
}

/// Admits or rejects each request against a per-key [`Strategy`].
///
/// The decision is taken in `call`, once the key is known. Readiness is
/// delegated to the inner service.
#[derive(Debug)]
pub struct RuleService<S, L, E>
where
    L: ?Sized,
{
    inner: S,
    rule: Arc<L>,
    extractor: E,
    instruments: RuleServiceMetrics,
}

impl<S, L, E> Clone for RuleService<S, L, E>
where
    S: Clone,
    L: ?Sized,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            rule: Arc::clone(&self.rule),
            extractor: self.extractor.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, L, E> RuleService<S, L, E>
where
    L: ?Sized,
{
    pub fn new(inner: S, rule: Arc<L>, extractor: E) -> Self {
        let meter = global::meter("tower_tier");
        let instruments = RuleServiceMetrics {
            rejected: meter.u64_counter("tier_rule_rejected").build(),
        };

        Self {
            inner,
            rule,
            extractor,
            instruments,
        }
    }
}

impl<S, L, E, Req> Service<Req> for RuleService<S, L, E>
where
    L: Strategy<E::Key> + ?Sized + Send + Sync + 'static,
    E: KeyExtractor<Req>,
    E::Key: Debug,
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let Some(key) = self.extractor.extract(&req) else {
            debug!("request carries no rate limit key");
            return ResponseFuture::rejected(TierError::MissingKey);
        };

        match self.rule.process(&key) {
            ControlFlow::Continue(()) => ResponseFuture::new(self.inner.call(req), None),
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                debug!(?key, ?retry_after, "request rate limited");
                self.instruments.rejected.add(1, &[]);
                ResponseFuture::rejected(TierError::RateLimited { retry_after })
            }
        }
    }
}

pin_project! {
    /// Response future shared by the tier services.
    ///
    /// Either drives the inner future, holding an optional in-flight guard
    /// until it completes, or resolves immediately to a rejection.
    pub struct ResponseFuture<F> {
        #[pin]
        kind: Kind<F>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<F> {
        Inner {
            #[pin]
            future: F,
            guard: Option<InFlightGuard>,
        },
        Rejected {
            error: Option<TierError>,
        },
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(future: F, guard: Option<InFlightGuard>) -> Self {
        Self {
            kind: Kind::Inner { future, guard },
        }
    }

    pub(crate) fn rejected(error: TierError) -> Self {
        Self {
            kind: Kind::Rejected { error: Some(error) },
        }
    }
}

impl<F, T> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, BoxError>>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().kind.project() {
            KindProj::Inner { future, guard } => {
                let res = ready!(future.poll(cx));
                // Release the in-flight slot as soon as the response is ready
                guard.take();
                Poll::Ready(res)
            }
            KindProj::Rejected { error } => {
                let error = error
                    .take()
                    .unwrap_or_else(|| TierError::Inner("response polled after completion".into()));
                Poll::Ready(Err(BoxError::from(error)))
            }
        }
    }
}
