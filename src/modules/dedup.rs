//! Bounded FIFO window of recently alerted transaction hashes

use std::collections::{HashSet, VecDeque};

/// Capacity used when none is configured
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// Insertion-ordered set of hashes; the oldest entry is evicted once capacity is exceeded.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.members.contains(hash)
    }

    /// Mark `hash` as seen. Returns `false` if it was already present (order unchanged).
    pub fn insert(&mut self, hash: &str) -> bool {
        if !self.members.insert(hash.to_string()) {
            return false;
        }
        self.order.push_back(hash.to_string());

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest hash still held
    #[cfg(test)]
    pub(crate) fn oldest(&self) -> Option<&str> {
        self.order.front().map(String::as_str)
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
