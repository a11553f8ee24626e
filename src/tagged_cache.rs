/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A thread-safe key-value cache bounded by a target size and a target age.
//!
//! Entries are never evicted on insertion. Instead, [`sweep`](TaggedCache::sweep) (called periodically by
//! the owner) drops entries that have not been touched for longer than the target age, then drops the
//! least recently touched entries until the cache is back within its target size.
//!
//! [`canonicalize`](TaggedCache::canonicalize) gives every caller the same shared value for a given key,
//! so that two components that insert the same ledger end up holding the same `Arc`.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::Mutex,
    time::{Duration, Instant},
};

struct CacheEntry<V> {
    value: V,
    last_access: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups that found their key, or 0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

pub struct TaggedCache<K, V> {
    name: &'static str,
    target_size: usize,
    target_age: Duration,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TaggedCache<K, V> {
    pub fn new(name: &'static str, target_size: usize, target_age: Duration) -> Self {
        Self {
            name,
            target_size,
            target_age,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the value stored under `key`, refreshing its age.
    pub fn fetch(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let now = Instant::now();
        let found = inner.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.value.clone()
        });
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Insert `value` under `key` if the key is absent. Returns the value the cache now holds, which is
    /// the previously stored value if there was one.
    pub fn canonicalize(&self, key: K, value: V) -> V {
        let mut inner = self.lock();
        let now = Instant::now();
        let entry = inner.entries.entry(key).or_insert(CacheEntry {
            value,
            last_access: now,
        });
        entry.last_access = now;
        entry.value.clone()
    }

    /// Insert `value` under `key`, replacing any stored value. Returns whether the key was present.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut inner = self.lock();
        inner
            .entries
            .insert(
                key,
                CacheEntry {
                    value,
                    last_access: Instant::now(),
                },
            )
            .is_some()
    }

    /// Remove and return the value stored under `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().entries.remove(key).map(|entry| entry.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Evict expired entries, then the least recently used entries over the target size. Returns the
    /// number of entries evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Like [`sweep`](Self::sweep), measuring ages against `now`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        let target_age = self.target_age;

        inner
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_access) <= target_age);

        if inner.entries.len() > self.target_size {
            let mut by_age: Vec<(K, Instant)> = inner
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.last_access))
                .collect();
            by_age.sort_by_key(|(_, last_access)| *last_access);
            let excess = inner.entries.len() - self.target_size;
            for (key, _) in by_age.into_iter().take(excess) {
                inner.entries.remove(&key);
            }
        }

        let evicted = before - inner.entries.len();
        if evicted > 0 {
            log::trace!("{} cache swept {} entries", self.name, evicted);
        }
        evicted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<K, V>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
