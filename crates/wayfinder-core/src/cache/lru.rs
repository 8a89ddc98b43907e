//! Recency list backing one cache namespace.
//!
//! A `HashMap<String, usize>` indexes into a slab of nodes that form a
//! doubly linked list ordered from most- to least-recently used. Every
//! mutation keeps the map's key set equal to the list's node set.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cached payload with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    /// An entry is expired once its age exceeds its ttl.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

#[derive(Debug)]
struct Node<V> {
    key: String,
    entry: CacheEntry<V>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct LruList<V> {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> Default for LruList<V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }
}

impl<V> LruList<V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Entry without touching recency.
    pub(crate) fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|n| &n.entry)
    }

    /// Entry moved to the front.
    pub(crate) fn touch(&mut self, key: &str) -> Option<&mut CacheEntry<V>> {
        let slot = *self.index.get(key)?;
        self.unlink(slot);
        self.push_front(slot);
        self.node_mut(slot).map(|n| &mut n.entry)
    }

    /// Insert or replace; either way the key ends up at the front.
    pub(crate) fn put(&mut self, key: String, entry: CacheEntry<V>) {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(node) = self.node_mut(slot) {
                node.entry = entry;
            }
            self.unlink(slot);
            self.push_front(slot);
            return;
        }

        let node = Node {
            key: key.clone(),
            entry,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.release(slot).map(|node| node.entry)
    }

    /// Remove the least-recently-used entry.
    pub(crate) fn pop_back(&mut self) -> Option<(String, CacheEntry<V>)> {
        let slot = self.tail?;
        self.unlink(slot);
        let node = self.release(slot)?;
        self.index.remove(&node.key);
        Some((node.key, node.entry))
    }

    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.len();
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        removed
    }

    /// Keys from most- to least-recently used.
    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.node(slot) {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    /// Up to `limit` keys whose entries are expired at `now`.
    pub(crate) fn expired_keys(&self, now: Instant, limit: usize) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .filter(|node| node.entry.is_expired_at(now))
            .take(limit)
            .map(|node| node.key.clone())
            .collect()
    }

    fn node(&self, slot: usize) -> Option<&Node<V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn release(&mut self, slot: usize) -> Option<Node<V>> {
        let node = self.slots.get_mut(slot)?.take();
        if node.is_some() {
            self.free.push(slot);
        }
        node
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.node_mut(h) {
                node.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Walk the list both ways and compare against the index.
    #[cfg(test)]
    pub(crate) fn check_links(&self) -> bool {
        let forward = self.keys();
        let mut backward = Vec::new();
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            let node = match self.node(slot) {
                Some(node) => node,
                None => return false,
            };
            backward.push(node.key.clone());
            cursor = node.prev;
        }
        backward.reverse();

        forward == backward
            && forward.len() == self.index.len()
            && forward.iter().all(|k| self.index.contains_key(k))
    }
}
