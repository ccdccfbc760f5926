//! History - bounded record of recent events
//!
//! Components keep their observable logs here. Only the most recent
//! `limit` entries are kept; older ones are evicted so a long-lived
//! service does not grow without bound.

use std::collections::VecDeque;

use tracing::debug;

/// Entries kept when no limit is configured
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Ring buffer of the most recent entries, oldest first
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: VecDeque<T>,
    limit: usize,
    evicted: u64,
}

impl<T: Clone> History<T> {
    /// Keep at most `limit` entries (at least one)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit,
            evicted: 0,
        }
    }

    pub fn push(&mut self, entry: T) {
        // Add to queue, evict oldest if at capacity
        if self.entries.len() >= self.limit {
            self.entries.pop_front();
            self.evicted += 1;
            if self.evicted == 1 {
                debug!(limit = self.limit, "History::push: limit reached, evicting oldest entries");
            }
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Entries dropped to stay within the limit
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Copy of the retained entries, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T: Clone> Default for History<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
