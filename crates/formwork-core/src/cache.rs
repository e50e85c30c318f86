//! Time-boxed LRU cache keyed by structured keys.
//!
//! Entries expire after a fixed TTL and the least recently used entry is
//! evicted once the capacity is reached. Keys name the object that owns them,
//! so every entry derived from an object can be dropped when it changes.
//! The cache is only ever an accelerator; callers must be correct without it.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::id::ObjectId;

/// A cache key that belongs to one scene object.
pub trait OwnedKey {
    fn owner(&self) -> &ObjectId;
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// TTL + LRU cache.
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// LRU order (most recently used last).
    lru_order: VecDeque<K>,
    ttl: Duration,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + OwnedKey,
    V: Clone,
{
    /// Create a cache with the given time-to-live and entry capacity.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_order: VecDeque::new(),
            ttl,
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Get a live entry, refreshing its LRU position.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Like [`get`](Self::get) with an explicit clock reading.
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.remove(key);
            self.misses += 1;
            return None;
        }
        self.touch(key);
        self.hits += 1;
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert an entry. Evicts the least recently used entry if full.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Like [`insert`](Self::insert) with an explicit clock reading.
    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if self.entries.contains_key(&key) {
            self.lru_order.retain(|k| k != &key);
        }
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            let Some(oldest) = self.lru_order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.lru_order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Drop one entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.lru_order.retain(|k| k != key);
        Some(entry.value)
    }

    /// Drop every entry owned by `owner`. Returns how many were removed.
    pub fn invalidate_owner(&mut self, owner: &ObjectId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.owner() != owner);
        self.lru_order.retain(|k| k.owner() != owner);
        before - self.entries.len()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.lru_order.iter().position(|k| k == key) {
            if let Some(k) = self.lru_order.remove(pos) {
                self.lru_order.push_back(k);
            }
        }
    }

    /// Number of stored entries (live or not yet purged).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Clear the entire cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru_order.clear();
    }
}
