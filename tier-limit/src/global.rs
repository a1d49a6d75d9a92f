use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::config::GlobalConfig;

/// How a [`GlobalLimiter`] checks and claims capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    /// Load, compare, then increment. Concurrent entrants may briefly push
    /// the in-flight count past `max` (by at most the number racing).
    #[default]
    BestEffort,
    /// Compare-and-swap loop. The in-flight count never exceeds `max`.
    Strict,
}

/// Caps the number of requests being handled at the same moment.
///
/// This is a gauge, not a window: capacity is returned as soon as an
/// [`InFlightGuard`] is dropped.
#[derive(Debug)]
pub struct GlobalLimiter {
    max: u64,
    in_flight: AtomicU64,
    mode: LimitMode,
}

impl GlobalLimiter {
    pub fn new(max: u64) -> Self {
        Self {
            max,
            in_flight: AtomicU64::new(0),
            mode: LimitMode::default(),
        }
    }

    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.max).with_mode(config.mode)
    }

    pub fn with_mode(mut self, mode: LimitMode) -> Self {
        self.mode = mode;
        self
    }

    /// Claims one unit of capacity, or returns `None` when full.
    pub fn try_acquire(self: &Arc<Self>) -> Option<InFlightGuard> {
        let claimed = match self.mode {
            LimitMode::BestEffort => {
                if self.in_flight.load(Ordering::Acquire) >= self.max {
                    false
                } else {
                    self.in_flight.fetch_add(1, Ordering::AcqRel);
                    true
                }
            }
            LimitMode::Strict => self
                .in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.max).then_some(n + 1)
                })
                .is_ok(),
        };

        claimed.then(|| InFlightGuard {
            limiter: Arc::clone(self),
        })
    }

    /// Requests currently holding a guard.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn mode(&self) -> LimitMode {
        self.mode
    }
}

/// One unit of in-flight capacity. Released on drop.
#[derive(Debug)]
#[must_use = "capacity is released as soon as the guard is dropped"]
pub struct InFlightGuard {
    limiter: Arc<GlobalLimiter>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.limiter.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
