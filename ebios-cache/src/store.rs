//! Synchronous keyed store with per-entry expiry and FIFO capacity eviction.
//!
//! The store is a plain data structure: every method that depends on time
//! takes `now` explicitly and nothing in here suspends, so a mutation is
//! always observed as a whole by the next caller.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use ebios_core::EntityKey;
use tokio::time::Instant;

/// Shortest TTL the store will record, so `expires_at > created_at` holds.
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// Longest TTL the store will record. Longer ones are clamped, so a deadline
/// is always representable.
pub const MAX_TTL: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + ttl` with `ttl` clamped to `[MIN_TTL, MAX_TTL]`.
fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.clamp(MIN_TTL, MAX_TTL);
    now.checked_add(ttl).unwrap_or_else(|| now + MIN_TTL)
}

/// A cached value with its insertion metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
    /// Insertion sequence number, used for oldest-first eviction.
    seq: u64,
}

impl<V> CacheEntry<V> {
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn ttl(&self) -> Duration {
        self.expires_at - self.created_at
    }

    /// An entry is logically absent from `expires_at` onwards.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of a counted lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Hit(V),
    Miss,
    /// The entry existed but had expired; it has been removed.
    Expired,
}

/// Keyed entry map with a maximum entry count.
///
/// Eviction is by insertion order, not by access recency. Overwriting a key
/// re-inserts it, so it moves to the back of the eviction queue.
#[derive(Debug)]
pub struct CacheStore<V> {
    entries: HashMap<EntityKey, CacheEntry<V>>,
    order: BTreeMap<u64, EntityKey>,
    next_seq: u64,
    max_entries: usize,
}

impl<V: Clone> CacheStore<V> {
    /// Create an empty store. A zero capacity is raised to one.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Look up `key`, removing it when expired.
    pub fn get(&mut self, key: &EntityKey, now: Instant) -> Lookup<V> {
        match self.entries.get(key) {
            None => Lookup::Miss,
            Some(entry) if entry.is_expired(now) => {
                self.remove(key);
                Lookup::Expired
            }
            Some(entry) => Lookup::Hit(entry.value.clone()),
        }
    }

    /// Borrow a live entry without evicting anything.
    pub fn peek(&self, key: &EntityKey, now: Instant) -> Option<&CacheEntry<V>> {
        self.entries.get(key).filter(|entry| !entry.is_expired(now))
    }

    pub fn contains(&self, key: &EntityKey, now: Instant) -> bool {
        self.peek(key, now).is_some()
    }

    /// Insert or overwrite `key`, returning the keys evicted to make room.
    pub fn insert(&mut self, key: EntityKey, value: V, ttl: Duration, now: Instant) -> Vec<EntityKey> {
        self.remove(&key);

        let evicted = self.evict_to(self.max_entries - 1);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at: deadline_after(now, ttl),
                seq,
            },
        );

        evicted
    }

    /// Remove `key` if present.
    pub fn remove(&mut self, key: &EntityKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    /// Drop every entry, returning how many were held.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.order.clear();
        count
    }

    /// Remove every expired entry and return the number removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<EntityKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Change the capacity, evicting the oldest entries if it shrank.
    pub fn set_max_entries(&mut self, max_entries: usize) -> Vec<EntityKey> {
        self.max_entries = max_entries.max(1);
        self.evict_to(self.max_entries)
    }

    /// Keys from oldest to newest insertion.
    pub fn keys_by_age(&self) -> impl Iterator<Item = &EntityKey> {
        self.order.values()
    }

    fn evict_to(&mut self, limit: usize) -> Vec<EntityKey> {
        let mut evicted = Vec::new();
        while self.entries.len() > limit {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }
}
