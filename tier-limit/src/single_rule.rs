use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Reason;
use super::Strategy;
use crate::queue::CircularQueue;

/// Lower bound on the sweeper tick.
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on the sweeper tick.
pub const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Windows shorter than this are raised to it.
pub const MIN_WINDOW: Duration = Duration::from_millis(1);

/// The sweeper tick for a given window: `window / 100`, clamped to `[1s, 60s]`.
pub fn cleanup_interval(window: Duration) -> Duration {
    (window / 100).clamp(MIN_CLEANUP_INTERVAL, MAX_CLEANUP_INTERVAL)
}

/// Slot storage. Every index of `queues` is either bound to a key in `used`
/// or listed in `free`, never both.
struct Slots<K> {
    queues: Vec<CircularQueue>,
    used: HashMap<K, usize>,
    free: Vec<usize>,
}

struct Shared<K> {
    window_ns: i64,
    allowance: usize,
    estimated: usize,
    clock: Clock,
    anchor: Instant,
    slots: Mutex<Slots<K>>,
}

impl<K> Shared<K>
where
    K: Eq + Hash + Clone,
{
    #[inline]
    fn now(&self) -> i64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as i64
    }

    fn admit(&self, key: &K) -> ControlFlow<Reason> {
        let mut guard = self.slots.lock();
        let slots = &mut *guard;
        // Read the clock under the lock so deadlines stay ordered per slot.
        let now = self.now();
        let deadline = now + self.window_ns;

        if let Some(&idx) = slots.used.get(key) {
            let queue = &mut slots.queues[idx];
            queue.prune_expired(now);
            return match queue.push(deadline) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => {
                    // An entry is live while its deadline >= now, so room opens
                    // one nanosecond after the earliest deadline.
                    let earliest = queue.peek().unwrap_or(now);
                    ControlFlow::Break(Reason::Overloaded {
                        retry_after: Duration::from_nanos((earliest - now + 1).max(1) as u64),
                    })
                }
            };
        }

        let idx = match slots.free.pop() {
            Some(idx) => idx,
            None => {
                slots.queues.push(CircularQueue::new(self.allowance));
                slots.queues.len() - 1
            }
        };
        // A recycled or fresh slot is empty and holds at least one entry.
        let pushed = slots.queues[idx].push(deadline);
        debug_assert!(pushed.is_ok());
        slots.used.insert(key.clone(), idx);
        ControlFlow::Continue(())
    }

    fn rollback(&self, key: &K) {
        let mut guard = self.slots.lock();
        let slots = &mut *guard;
        let Some(&idx) = slots.used.get(key) else {
            return;
        };
        let queue = &mut slots.queues[idx];
        let _ = queue.pop_back();
        if queue.is_empty() {
            slots.used.remove(key);
            slots.free.push(idx);
        }
    }

    fn remaining(&self, key: &K) -> usize {
        let mut guard = self.slots.lock();
        let slots = &mut *guard;
        match slots.used.get(key) {
            Some(&idx) => {
                let queue = &mut slots.queues[idx];
                queue.prune_expired(self.now());
                queue.free_slots()
            }
            None => self.allowance,
        }
    }

    fn sweep(&self) {
        let mut guard = self.slots.lock();
        let Slots { queues, used, free } = &mut *guard;
        let now = self.now();

        // Expire: recycle every slot whose queue drained.
        let before = used.len();
        used.retain(|_, idx| {
            let queue = &mut queues[*idx];
            queue.prune_expired(now);
            if queue.is_empty() {
                free.push(*idx);
                false
            } else {
                true
            }
        });
        trace!(
            released = before - used.len(),
            used = used.len(),
            free = free.len(),
            "sweep expired slots"
        );

        // Recover: shrink back towards the estimate after a spike.
        let total = queues.len();
        if total >= 2 * self.estimated && used.len() * 2 < free.len() {
            let target = used.len().max(self.estimated);
            let mut compacted = Vec::with_capacity(target);
            for idx in used.values_mut() {
                compacted.push(std::mem::replace(
                    &mut queues[*idx],
                    CircularQueue::new(0),
                ));
                *idx = compacted.len() - 1;
            }
            let live = compacted.len();
            compacted.resize_with(target, || CircularQueue::new(self.allowance));
            *queues = compacted;
            *free = (live..target).collect();
            debug!(before = total, after = target, live, "compacted rule slots");
        }
    }
}

/// Owns the background sweeper thread. Dropping it stops and joins the thread.
struct Sweeper {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    fn spawn<K>(shared: Arc<Shared<K>>, interval: Duration) -> Self
    where
        K: Eq + Hash + Clone + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("tier-limit-sweeper".to_string())
            .spawn(move || {
                trace!(?interval, "sweeper started");
                // Any message, or the sender going away, ends the loop.
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    shared.sweep();
                }
                trace!("sweeper stopped");
            });

        match spawned {
            Ok(handle) => Self {
                stop: Some(stop),
                handle: Some(handle),
            },
            Err(err) => {
                // Expired entries are still pruned lazily on admission.
                warn!(error = %err, "failed to spawn sweeper; slots will not be recycled");
                Self {
                    stop: None,
                    handle: None,
                }
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One sliding window policy: at most `allowance` admissions per key within
/// any rolling `window`.
///
/// Each active key is bound to a slot holding a [`CircularQueue`] of expiry
/// deadlines. A background sweeper recycles the slots of idle keys and, after
/// a traffic spike, shrinks the slot vector back towards `estimated`.
pub struct SingleRule<K> {
    shared: Arc<Shared<K>>,
    window: Duration,
    cleanup_interval: Duration,
    _sweeper: Sweeper,
}

impl<K> SingleRule<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Creates a rule on the system clock.
    ///
    /// `allowance == 0` is treated as 1 and a missing or zero `estimated`
    /// falls back to the allowance.
    pub fn new(window: Duration, allowance: usize, estimated: Option<usize>) -> Self {
        Self::with_clock(window, allowance, estimated, Clock::new())
    }

    /// Creates a rule reading time from `clock`.
    pub fn with_clock(
        window: Duration,
        allowance: usize,
        estimated: Option<usize>,
        clock: Clock,
    ) -> Self {
        let window = window.max(MIN_WINDOW);
        let allowance = allowance.max(1);
        let estimated = match estimated {
            Some(e) if e > 0 => e,
            _ => allowance,
        };
        let cleanup_interval = cleanup_interval(window);

        let anchor = clock.now();
        let shared = Arc::new(Shared {
            window_ns: window.as_nanos() as i64,
            allowance,
            estimated,
            clock,
            anchor,
            slots: Mutex::new(Slots {
                queues: (0..estimated)
                    .map(|_| CircularQueue::new(allowance))
                    .collect(),
                used: HashMap::with_capacity(estimated),
                free: (0..estimated).rev().collect(),
            }),
        });

        let sweeper = Sweeper::spawn(Arc::clone(&shared), cleanup_interval);

        Self {
            shared,
            window,
            cleanup_interval,
            _sweeper: sweeper,
        }
    }
}

impl<K> SingleRule<K>
where
    K: Eq + Hash + Clone,
{
    /// Records one admission for `key` if its window has room.
    pub fn add(&self, key: &K) -> bool {
        self.shared.admit(key).is_continue()
    }

    /// Removes the most recent admission recorded for `key`.
    pub(crate) fn rollback(&self, key: &K) {
        self.shared.rollback(key);
    }

    /// Admissions still available to `key` in the current window.
    pub fn remaining(&self, key: &K) -> usize {
        self.shared.remaining(key)
    }

    /// Runs one expire and recovery pass immediately.
    pub fn sweep(&self) {
        self.shared.sweep();
    }

    /// Keys currently bound to a slot.
    pub fn online_keys(&self) -> Vec<K> {
        self.shared.slots.lock().used.keys().cloned().collect()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn allowance(&self) -> usize {
        self.shared.allowance
    }

    pub fn estimated(&self) -> usize {
        self.shared.estimated
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Total number of slots, bound or free.
    pub fn slots(&self) -> usize {
        self.shared.slots.lock().queues.len()
    }

    /// Number of slots bound to a key.
    pub fn used_slots(&self) -> usize {
        self.shared.slots.lock().used.len()
    }

    /// Number of slots waiting to be reused.
    pub fn free_slot_count(&self) -> usize {
        self.shared.slots.lock().free.len()
    }
}

impl<K> Strategy<K> for SingleRule<K>
where
    K: Eq + Hash + Clone,
{
    fn process(&self, key: &K) -> ControlFlow<Reason> {
        self.shared.admit(key)
    }
}

impl<K> fmt::Debug for SingleRule<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleRule")
            .field("window", &self.window)
            .field("allowance", &self.shared.allowance)
            .field("estimated", &self.shared.estimated)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}
