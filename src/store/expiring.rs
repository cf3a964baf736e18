//! Keyed map whose entries expire after a period of inactivity.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    touched: Instant,
}

/// A thread-safe map that forgets entries idle for longer than `ttl`.
///
/// Expiry is lazy: reads skip stale entries and `prune_at` removes them.
/// Callers run periodic pruning from the maintenance task.
pub struct ExpiringMap<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
    ttl: Duration,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // A poisoned lock only means another thread panicked mid-update; the
    // counters are still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_stale(&self, slot: &Slot<V>, now: Instant) -> bool {
        now.saturating_duration_since(slot.touched) > self.ttl
    }

    /// Run `f` against the entry for `key`, creating it with `init` when it is
    /// missing or expired. The entry is marked as touched at `now`.
    pub fn with_entry_at<R>(
        &self,
        key: K,
        now: Instant,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut entries = self.lock();
        let stale = entries
            .get(&key)
            .map(|slot| self.is_stale(slot, now))
            .unwrap_or(false);
        if stale {
            entries.remove(&key);
        }
        let slot = entries.entry(key).or_insert_with(|| Slot {
            value: init(),
            touched: now,
        });
        slot.touched = now;
        f(&mut slot.value)
    }

    /// Run `f` against an existing live entry without creating one.
    pub fn update_at<R>(&self, key: &K, now: Instant, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut entries = self.lock();
        let slot = entries.get_mut(key)?;
        if self.is_stale(slot, now) {
            entries.remove(key);
            return None;
        }
        slot.touched = now;
        Some(f(&mut slot.value))
    }

    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        self.lock().insert(key, Slot { value, touched: now });
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|slot| slot.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        self.lock()
            .get(key)
            .map(|slot| !self.is_stale(slot, now))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove entries idle beyond the TTL. Returns how many were dropped.
    pub fn prune_at(&self, now: Instant) -> usize {
        self.prune_where(now, |_, _| true)
    }

    /// Remove entries idle beyond the TTL, and any live entry for which
    /// `keep` returns false.
    pub fn prune_where(&self, now: Instant, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let ttl = self.ttl;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, slot| {
            now.saturating_duration_since(slot.touched) <= ttl && keep(key, &slot.value)
        });
        before - entries.len()
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|slot| !self.is_stale(slot, now))
            .map(|slot| slot.value.clone())
    }

    /// Copy out every live entry.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|(_, slot)| !self.is_stale(slot, now))
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_created_and_updated() {
        let map: ExpiringMap<String, u32> = ExpiringMap::new(Duration::from_secs(60));
        let now = Instant::now();

        let first = map.with_entry_at("a".into(), now, || 0, |v| {
            *v += 1;
            *v
        });
        let second = map.with_entry_at("a".into(), now, || 0, |v| {
            *v += 1;
            *v
        });

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_stale_entry_is_recreated() {
        let map: ExpiringMap<&'static str, u32> = ExpiringMap::new(Duration::from_secs(10));
        let start = Instant::now();
        map.with_entry_at("k", start, || 5, |_| ());

        let later = start + Duration::from_secs(11);
        let value = map.with_entry_at("k", later, || 0, |v| *v);
        assert_eq!(value, 0, "expired entry must be re-initialised");
    }

    #[test]
    fn test_update_at_ignores_missing_and_stale() {
        let map: ExpiringMap<&'static str, u32> = ExpiringMap::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(map.update_at(&"k", start, |v| *v).is_none());

        map.insert_at("k", 3, start);
        assert_eq!(map.update_at(&"k", start, |v| *v), Some(3));
        assert!(map.update_at(&"k", start + Duration::from_secs(30), |v| *v).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_prune_removes_idle_entries() {
        let map: ExpiringMap<u32, u32> = ExpiringMap::new(Duration::from_secs(5));
        let start = Instant::now();
        map.insert_at(1, 1, start);
        map.insert_at(2, 2, start + Duration::from_secs(4));

        let removed = map.prune_at(start + Duration::from_secs(6));
        assert_eq!(removed, 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_prune_where_drops_rejected_live_entries() {
        let map: ExpiringMap<u32, u32> = ExpiringMap::new(Duration::from_secs(60));
        let now = Instant::now();
        map.insert_at(1, 0, now);
        map.insert_at(2, 7, now);

        let removed = map.prune_where(now, |_, v| *v > 0);
        assert_eq!(removed, 1);
        assert_eq!(map.snapshot(), vec![(2, 7)]);
    }
}
