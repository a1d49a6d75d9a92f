use std::fmt::Debug;
use std::sync::Arc;

use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower::util::BoxCloneSyncService;

use tier_limit::GlobalLimiter;
use tier_limit::Strategy;

use crate::GlobalLimitLayer;
use crate::KeyExtractor;
use crate::RuleLayer;

/// Guard `svc` with an in-flight cap in front of a per-key rule.
///
/// Shed requests never reach the rule, so they do not spend any allowance.
pub fn make_tiered_svc<R, E, V, Req, Resp>(
    rule: Arc<R>,
    extractor: E,
    limiter: Arc<GlobalLimiter>,
    svc: V,
) -> BoxCloneSyncService<Req, Resp, BoxError>
where
    R: Strategy<E::Key> + ?Sized + Send + Sync + 'static,
    E: KeyExtractor<Req> + Clone + Send + Sync + 'static,
    E::Key: Debug,
    Req: Send + 'static,
    V: Service<Req, Response = Resp, Error = BoxError> + Clone + Send + Sync + 'static,
    <V as Service<Req>>::Future: Send,
{
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .global_limit(limiter)
            .tier_rule(rule, extractor)
            .service(svc),
    )
}

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a per-key rule layer
    fn tier_rule<R, E>(self, rule: Arc<R>, extractor: E) -> ServiceBuilder<Stack<RuleLayer<R, E>, L>>
    where
        R: ?Sized;

    /// Add an in-flight cap
    fn global_limit(self, limiter: Arc<GlobalLimiter>) -> ServiceBuilder<Stack<GlobalLimitLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn tier_rule<R, E>(self, rule: Arc<R>, extractor: E) -> ServiceBuilder<Stack<RuleLayer<R, E>, L>>
    where
        R: ?Sized,
    {
        self.layer(RuleLayer::new(rule, extractor))
    }

    fn global_limit(self, limiter: Arc<GlobalLimiter>) -> ServiceBuilder<Stack<GlobalLimitLayer, L>> {
        self.layer(GlobalLimitLayer::with_limiter(limiter))
    }
}
