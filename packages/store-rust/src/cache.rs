//! Bounded local cache: LRU recency order with per-entry TTL.
//!
//! The recency list is an intrusive doubly linked list over a slab, with an
//! id -> slot map for O(1) lookup, promotion, and eviction. One mutex guards
//! the structure; all critical sections are O(1) (promotion, unlink, insert).
//! Hit/miss/eviction counters are atomics maintained outside the lock.
//!
//! Edge policies: capacity 0 disables caching entirely; TTL 0 disables time
//! expiry (entries live until LRU pressure or invalidation); putting an
//! already-expired record is a no-op that also evicts any prior entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use seshat_core::SessionRecord;

const NIL: usize = usize::MAX;

/// Cache counters snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Node<T> {
    id: String,
    value: SessionRecord<T>,
    inserted_at_ms: u64,
    last_used_at_ms: u64,
    prev: usize,
    next: usize,
}

struct Inner<T> {
    map: HashMap<String, usize>,
    slab: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    /// Most recently used slot.
    head: usize,
    /// Least recently used slot.
    tail: usize,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            slab: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn node(&self, idx: usize) -> &Node<T> {
        self.slab[idx].as_ref().expect("live slot")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<T> {
        self.slab[idx].as_mut().expect("live slot")
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let n = self.node(idx);
            (n.prev, n.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.node_mut(next).prev = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let n = self.node_mut(idx);
            n.prev = NIL;
            n.next = old_head;
        }
        if old_head != NIL {
            self.node_mut(old_head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    /// Removes the slot entirely, returning it to the free list.
    fn remove(&mut self, idx: usize) -> Node<T> {
        self.unlink(idx);
        let node = self.slab[idx].take().expect("live slot");
        self.map.remove(&node.id);
        self.free.push(idx);
        node
    }

    fn insert_front(&mut self, node: Node<T>) {
        let idx = if let Some(idx) = self.free.pop() {
            self.slab[idx] = Some(node);
            idx
        } else {
            self.slab.push(Some(node));
            self.slab.len() - 1
        };
        let id = self.node(idx).id.clone();
        self.map.insert(id, idx);
        self.push_front(idx);
    }
}

/// Bounded LRU cache with per-entry TTL over session records.
///
/// Non-authoritative: the backing store owns the canonical copy, and any
/// divergence is resolved by re-reading it.
pub struct LocalCache<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    ttl_ms: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone> LocalCache<T> {
    /// Creates a cache holding at most `capacity` entries, each live for
    /// `ttl_ms` (0 = no time expiry). Capacity 0 disables caching.
    #[must_use]
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            capacity,
            ttl_ms,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn entry_live(&self, inserted_at_ms: u64, value: &SessionRecord<T>, now_ms: u64) -> bool {
        let within_ttl = self.ttl_ms == 0 || now_ms.saturating_sub(inserted_at_ms) < self.ttl_ms;
        within_ttl && value.is_valid(now_ms)
    }

    /// Inserts or replaces the entry for `id`.
    ///
    /// Putting an already-expired record evicts any prior entry instead of
    /// storing a dead one. Overflowing the capacity evicts the
    /// least-recently-used entry.
    pub fn put(&self, id: &str, value: SessionRecord<T>, now_ms: u64) {
        if self.capacity == 0 {
            return;
        }
        if !value.is_valid(now_ms) {
            self.evict(id);
            return;
        }

        let mut overflowed = false;
        {
            let mut inner = self.inner.lock();
            if let Some(&idx) = inner.map.get(id) {
                let node = inner.node_mut(idx);
                node.value = value;
                node.inserted_at_ms = now_ms;
                node.last_used_at_ms = now_ms;
                inner.promote(idx);
            } else {
                inner.insert_front(Node {
                    id: id.to_string(),
                    value,
                    inserted_at_ms: now_ms,
                    last_used_at_ms: now_ms,
                    prev: NIL,
                    next: NIL,
                });
                if inner.map.len() > self.capacity {
                    let tail = inner.tail;
                    inner.remove(tail);
                    overflowed = true;
                }
            }
        }
        if overflowed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the cached record if its entry is live and the record itself
    /// has not expired; promotes it to most-recently-used. Dead entries are
    /// removed on the way out and count as misses.
    pub fn get(&self, id: &str, now_ms: u64) -> Option<SessionRecord<T>> {
        if self.capacity == 0 {
            return None;
        }
        let result = {
            let mut inner = self.inner.lock();
            match inner.map.get(id).copied() {
                Some(idx) => {
                    let live = {
                        let node = inner.node(idx);
                        self.entry_live(node.inserted_at_ms, &node.value, now_ms)
                    };
                    if live {
                        let node = inner.node_mut(idx);
                        node.last_used_at_ms = now_ms;
                        let value = node.value.clone();
                        inner.promote(idx);
                        Some(value)
                    } else {
                        inner.remove(idx);
                        None
                    }
                }
                None => None,
            }
        };
        match &result {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Removes the entry if present, counting an eviction.
    pub fn evict(&self, id: &str) {
        let removed = {
            let mut inner = self.inner.lock();
            match inner.map.get(id).copied() {
                Some(idx) => {
                    inner.remove(idx);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` currently has an entry (live or not; no promotion).
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().map.contains_key(id)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}
