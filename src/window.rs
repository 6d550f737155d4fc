//! Sliding-window unique-identifier counter.
//!
//! FIFO-plus-map design: a time-ordered `VecDeque` of
//! `(identifier, timestamp)` plus a `HashMap` for O(1) dedup/liveness, with a
//! monotonic live-size counter that only decrements when a head entry's map
//! entry still matches its timestamp — this is what keeps an explicit
//! `remove` from double-decrementing when the same head is later evicted.
//!
//! Grounded in the pack's bounded-admission shape (`other_examples`'s
//! `pantsbuild-pants` bounded command runner): a lock-guarded counter that
//! gates admission without needing strict cross-thread ordering.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct Inner {
    window_ms: i64,
    fifo: VecDeque<(String, i64)>,
    live: HashMap<String, i64>,
    size: usize,
}

impl Inner {
    /// Evict expired entries from the head of the FIFO. Stops at the first
    /// still-live head: eviction happens at the head on every mutating call
    /// and on `count()`.
    fn evict_expired(&mut self, now: i64) {
        while let Some((id, ts)) = self.fifo.front() {
            if now - *ts < self.window_ms {
                break;
            }
            let (id, ts) = self.fifo.pop_front().unwrap();
            // Only decrement if the map entry is still this exact
            // (id, timestamp) pair — a `remove()` may have already taken it
            // out, or a re-`add()` may have refreshed its timestamp, in
            // which case this stale FIFO entry is a tombstone to sweep
            // silently without touching `size`.
            if let Some(&current_ts) = self.live.get(&id) {
                if current_ts == ts {
                    self.live.remove(&id);
                    self.size = self.size.saturating_sub(1);
                }
            }
        }
    }
}

/// Per-executor sliding window of unique identifiers, safe for concurrent
/// callers. Precise cross-thread monotonicity of `count()` is not
/// guaranteed — only that `count() <= live map entries <= count() +
/// pending-expiries`.
#[derive(Clone)]
pub struct SlidingWindowCounter {
    inner: Arc<Mutex<Inner>>,
}

impl SlidingWindowCounter {
    pub fn new(window_ms: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                window_ms,
                fifo: VecDeque::new(),
                live: HashMap::new(),
                size: 0,
            })),
        }
    }

    /// Insert `id` iff it isn't already live. Returns `true` if it was
    /// newly inserted.
    pub fn try_add(&self, id: &str) -> bool {
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.evict_expired(now);
        if inner.live.contains_key(id) {
            return false;
        }
        inner.live.insert(id.to_string(), now);
        inner.fifo.push_back((id.to_string(), now));
        inner.size += 1;
        true
    }

    /// Unconditional insert/refresh: always (re)records `id` as live now.
    pub fn add(&self, id: &str) {
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.evict_expired(now);
        let already_live = inner.live.insert(id.to_string(), now).is_some();
        inner.fifo.push_back((id.to_string(), now));
        if !already_live {
            inner.size += 1;
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.evict_expired(now);
        inner.live.contains_key(id)
    }

    pub fn count(&self) -> usize {
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.evict_expired(now);
        inner.size
    }

    /// Detach `id` from the map immediately; the stale FIFO entry is left as
    /// a tombstone and swept lazily on the next eviction pass.
    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.lock();
        if inner.live.remove(id).is_some() {
            inner.size = inner.size.saturating_sub(1);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.fifo.clear();
        inner.live.clear();
        inner.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn try_add_then_try_add_again_is_idempotent() {
        let counter = SlidingWindowCounter::new(1000);
        assert!(counter.try_add("x"));
        assert!(!counter.try_add("x"));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn add_remove_round_trips_to_pre_count() {
        let counter = SlidingWindowCounter::new(1000);
        counter.add("a");
        counter.add("b");
        let pre = counter.count();
        counter.add("c");
        counter.remove("c");
        assert_eq!(counter.count(), pre);
    }

    #[test]
    fn entries_expire_after_window() {
        let counter = SlidingWindowCounter::new(50);
        counter.try_add("x");
        assert_eq!(counter.count(), 1);
        sleep(Duration::from_millis(80));
        assert_eq!(counter.count(), 0);
        assert!(!counter.contains("x"));
    }

    #[test]
    fn remove_then_evict_does_not_double_decrement() {
        let counter = SlidingWindowCounter::new(50);
        counter.try_add("x");
        counter.remove("x");
        assert_eq!(counter.count(), 0);
        sleep(Duration::from_millis(80));
        // eviction pass must not underflow `size` below 0
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn re_add_within_window_refreshes_without_double_counting() {
        let counter = SlidingWindowCounter::new(1000);
        counter.add("x");
        counter.add("x");
        assert_eq!(counter.count(), 1);
    }
}
