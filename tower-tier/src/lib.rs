//! # Tower Tier
//!
//! `tower-tier` puts [`tier_limit`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## Layers
//!
//! 1. [`RuleLayer`]: derives a key for each request with a [`KeyExtractor`]
//!    and checks it against a multi-window [`tier_limit::Rule`] (or any keyed
//!    [`tier_limit::Strategy`]). Rejected requests fail with
//!    `TierError::RateLimited`, carrying the time until the key regains
//!    capacity.
//! 2. [`GlobalLimitLayer`]: caps the number of requests in flight. Shed
//!    requests fail with `TierError::Overloaded`.
//!
//! Neither layer queues: the decision is made when the request is called,
//! and the rejection resolves immediately.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tier_limit::GlobalLimiter;
//! use tier_limit::Rule;
//! use tower::ServiceBuilder;
//! use tower_tier::ClientIp;
//! use tower_tier::ServiceBuilderExt;
//!
//! let mut rule: Rule = Rule::new();
//! rule.add_rule(Duration::from_secs(1), 5, None);
//!
//! let svc = ServiceBuilder::new()
//!     .global_limit(Arc::new(GlobalLimiter::new(512)))
//!     .tier_rule(Arc::new(rule), ClientIp)
//!     .service_fn(|_req: http::Request<()>| async {
//!         Ok::<_, tower::BoxError>("hello")
//!     });
//! # drop(svc);
//! ```
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`TierError`] (429 with `Retry-After`,
//!   503, 400, 500) and reads axum's `ConnectInfo` in [`ClientIp`] and
//!   [`PeerIp`].

mod error;
mod global_layer;
mod key;
mod layer;
mod service;
mod utils;


pub use error::TierError;
pub use global_layer::GlobalLimitLayer;
pub use global_layer::GlobalLimitService;
pub use key::ClientIp;
pub use key::Fallback;
pub use key::KeyExtractor;
pub use key::PeerIp;
pub use layer::RuleLayer;
pub use service::ResponseFuture;
pub use service::RuleService;
pub use utils::ServiceBuilderExt;
pub use utils::make_tiered_svc;
