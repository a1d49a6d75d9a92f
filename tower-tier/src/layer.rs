use std::sync::Arc;

use tower::Layer;

use crate::key::Fallback;
use crate::service::RuleService;

/// Applies a per-key rule to requests.
///
/// The extractor derives each request's key. Requests it cannot key are
/// rejected with `TierError::MissingKey` unless a fallback key is set.
#[derive(Debug)]
pub struct RuleLayer<L, E>
where
    L: ?Sized,
{
    rule: Arc<L>,
    extractor: E,
}

// Deriving Clone would require L: Clone
impl<L, E> Clone for RuleLayer<L, E>
where
    L: ?Sized,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            rule: Arc::clone(&self.rule),
            extractor: self.extractor.clone(),
        }
    }
}

impl<L, E> RuleLayer<L, E>
where
    L: ?Sized,
{
    /// Create a RuleLayer
    pub fn new(rule: Arc<L>, extractor: E) -> Self {
        RuleLayer { rule, extractor }
    }

    /// Key requests the extractor cannot key on `key` instead of rejecting them.
    pub fn with_fallback_key<K>(self, key: K) -> RuleLayer<L, Fallback<E, K>> {
        RuleLayer {
            rule: self.rule,
            extractor: Fallback::new(self.extractor, key),
        }
    }
}

impl<L, E, S> Layer<S> for RuleLayer<L, E>
where
    L: ?Sized,
    E: Clone,
{
    type Service = RuleService<S, L, E>;

    fn layer(&self, service: S) -> Self::Service {
        RuleService::new(service, Arc::clone(&self.rule), self.extractor.clone())
    }
}
