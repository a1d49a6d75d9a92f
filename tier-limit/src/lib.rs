//! # tier-limit
//!
//! `tier-limit` provides multi-window, per-key sliding window rate limiting and a
//! global in-flight limiter.
//!
//! ## Core Philosophy
//!
//! A [`Rule`] stacks one or more [`SingleRule`] windows ("5 per second and 100
//! per hour"). Each window counts admissions exactly: every admission stores its
//! expiry deadline in a fixed-capacity [`CircularQueue`] bound to the key, so a
//! key can never exceed its allowance within any rolling window.
//!
//! ## Key Concepts
//!
//! * **Slot Recycling**: Queues live in a flat vector. Idle keys give their slot
//!   back to a free list instead of freeing memory, and new keys reuse it.
//! * **Background Sweeper**: Each window runs one thread that prunes expired
//!   deadlines, recycles idle slots and, after a traffic spike, shrinks the slot
//!   vector back to the estimated key population.
//! * **Lazy Pruning**: Expired deadlines are also dropped on admission, so
//!   correctness never depends on the sweeper's timing.
//! * **Strategy Trait**: A unified keyed interface used by the `tower-tier`
//!   middleware.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use tier_limit::Rule;
//!
//! let mut rule: Rule = Rule::new();
//! rule.add_rule(Duration::from_secs(1), 3, None)
//!     .add_rule(Duration::from_secs(60), 20, Some(1000));
//!
//! if rule.allow_visit_by_ip("192.168.1.1") {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

pub mod config;
pub mod error;
mod global;
mod ip;
mod key;
mod queue;
mod rule;
mod single_rule;

pub use global::GlobalLimiter;
pub use global::InFlightGuard;
pub use global::LimitMode;
pub use ip::ipv4_to_uint;
pub use ip::parse_ipv4;
pub use ip::uint_to_ipv4;
pub use key::Key;
pub use queue::CircularQueue;
pub use rule::AdmissionMode;
pub use rule::Rule;
pub use single_rule::MAX_CLEANUP_INTERVAL;
pub use single_rule::MIN_CLEANUP_INTERVAL;
pub use single_rule::MIN_WINDOW;
pub use single_rule::SingleRule;
pub use single_rule::cleanup_interval;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    /// The key has used its allowance. Capacity returns after `retry_after`.
    Overloaded { retry_after: Duration },
}

/// The core trait for keyed rate-limiting strategies.
///
/// The trait itself requires only `Debug`. The `tower-tier` layers share a
/// strategy across threads through `Arc`, so they additionally require
/// `Send + Sync`.
pub trait Strategy<K: ?Sized>: Debug {
    /// Attempts to admit a single request for `key`.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the rate limit for `key` has been reached.
    fn process(&self, key: &K) -> ControlFlow<Reason>;
}
