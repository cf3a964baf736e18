//! Sliding request windows and the rate-limit backing store.
//!
//! # Responsibilities
//! - Keep the timestamps of recent requests per key
//! - Evict timestamps older than the window on every check
//! - Provide a swappable store so counts can live outside the process
//!
//! # Design Decisions
//! - Eviction is lazy (per check); idle windows are dropped by `prune`
//! - `hit` is one critical section: evict, compare, push
//! - The in-memory store is only correct within a single process

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::store::expiring::ExpiringMap;

/// Timestamps of recent requests for one key.
#[derive(Debug, Clone)]
pub struct RateWindow {
    timestamps: VecDeque<Instant>,
    window: Duration,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window,
        }
    }

    /// Drop timestamps that fall outside `[now - window, now]`.
    pub fn evict(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.saturating_duration_since(*front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Evict, then record `now` only if fewer than `max` requests remain.
    pub fn try_push(&mut self, now: Instant, max: u32) -> bool {
        self.evict(now);
        if self.timestamps.len() >= max as usize {
            return false;
        }
        self.timestamps.push_back(now);
        true
    }

    /// Evict, then always record `now`. Returns the count including `now`.
    pub fn record(&mut self, now: Instant) -> u32 {
        self.evict(now);
        self.timestamps.push_back(now);
        self.timestamps.len() as u32
    }

    /// Remove one recorded timestamp equal to `at`, if still present.
    pub fn remove(&mut self, at: Instant) -> bool {
        match self.timestamps.iter().rposition(|t| *t == at) {
            Some(idx) => {
                self.timestamps.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> u32 {
        self.timestamps.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Time until the oldest retained timestamp leaves the window.
    pub fn reset_in(&self, now: Instant) -> Duration {
        self.timestamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default()
    }
}

/// Result of recording one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub admitted: bool,
    pub count: u32,
    pub reset_in: Duration,
}

/// Backing store for fixed-window rate limiting.
///
/// Implementations must make `hit` atomic per key.
pub trait RateStore: Send + Sync {
    fn hit(&self, key: &str, window: Duration, max: u32, now: Instant) -> WindowState;

    /// Undo a previously admitted hit recorded at `at`.
    fn refund(&self, key: &str, at: Instant);

    /// Drop windows with no recent activity. Returns the number removed.
    fn prune(&self, now: Instant) -> usize;

    fn tracked(&self) -> usize;
}

/// Process-local `RateStore`.
pub struct MemoryRateStore {
    windows: ExpiringMap<String, RateWindow>,
}

impl MemoryRateStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            windows: ExpiringMap::new(idle_ttl),
        }
    }
}

impl RateStore for MemoryRateStore {
    fn hit(&self, key: &str, window: Duration, max: u32, now: Instant) -> WindowState {
        self.windows.with_entry_at(
            key.to_string(),
            now,
            || RateWindow::new(window),
            |w| {
                let admitted = w.try_push(now, max);
                WindowState {
                    admitted,
                    count: w.count(),
                    reset_in: w.reset_in(now),
                }
            },
        )
    }

    fn refund(&self, key: &str, at: Instant) {
        self.windows.update_at(&key.to_string(), at, |w| w.remove(at));
    }

    fn prune(&self, now: Instant) -> usize {
        self.windows.prune_where(now, |_, w| {
            let mut w = w.clone();
            w.evict(now);
            !w.is_empty()
        })
    }

    fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_admits_up_to_max() {
        let mut w = RateWindow::new(Duration::from_millis(1000));
        let now = Instant::now();
        let results: Vec<bool> = (0..4).map(|_| w.try_push(now, 3)).collect();
        assert_eq!(results, vec![true, true, true, false]);
        assert_eq!(w.count(), 3);
    }

    #[test]
    fn test_window_evicts_old_entries() {
        let mut w = RateWindow::new(Duration::from_millis(1000));
        let start = Instant::now();
        for _ in 0..3 {
            assert!(w.try_push(start, 3));
        }
        assert!(!w.try_push(start + Duration::from_millis(1000), 3));
        assert!(w.try_push(start + Duration::from_millis(1001), 3));
        assert_eq!(w.count(), 1);
    }

    #[test]
    fn test_record_always_appends() {
        let mut w = RateWindow::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(w.record(now), 1);
        assert_eq!(w.record(now), 2);
        assert_eq!(w.record(now + Duration::from_secs(61)), 1);
    }

    #[test]
    fn test_store_refund_returns_capacity() {
        let store = MemoryRateStore::new(Duration::from_secs(600));
        let now = Instant::now();
        let window = Duration::from_secs(60);

        assert!(store.hit("k", window, 1, now).admitted);
        assert!(!store.hit("k", window, 1, now).admitted);
        store.refund("k", now);
        assert!(store.hit("k", window, 1, now).admitted);
    }

    #[test]
    fn test_store_prune_drops_empty_windows() {
        let store = MemoryRateStore::new(Duration::from_secs(600));
        let now = Instant::now();
        store.hit("a", Duration::from_secs(1), 5, now);
        store.hit("b", Duration::from_secs(60), 5, now);

        let removed = store.prune(now + Duration::from_secs(2));
        assert_eq!(removed, 1);
        assert_eq!(store.tracked(), 1);
    }
}
