//! Bounded trailing history with oldest-first eviction

use std::collections::VecDeque;

/// Snapshot history capacity
pub const SNAPSHOT_CAPACITY: usize = 200;

/// Delta sample history capacity
pub const DELTA_CAPACITY: usize = 100;

/// Fixed-capacity FIFO. Pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, returning the evicted one if capacity was exceeded
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most recent item
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_exceeds_capacity() {
        let mut h = BoundedHistory::new(3);
        for i in 0..10 {
            h.push(i);
            assert!(h.len() <= 3);
        }
        assert_eq!(h.iter().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut h = BoundedHistory::new(2);
        assert_eq!(h.push("a"), None);
        assert_eq!(h.push("b"), None);
        assert_eq!(h.push("c"), Some("a"));
        assert_eq!(h.push("d"), Some("b"));
        assert_eq!(h.latest(), Some(&"d"));
        assert_eq!(h.iter().copied().collect::<Vec<_>>(), vec!["c", "d"]);
        assert!(!h.is_empty());
    }

    #[test]
    fn test_reference_capacities() {
        let mut snapshots = BoundedHistory::new(SNAPSHOT_CAPACITY);
        let mut deltas = BoundedHistory::new(DELTA_CAPACITY);
        for i in 0..500 {
            snapshots.push(i);
            deltas.push(i);
        }
        assert_eq!(snapshots.len(), 200);
        assert_eq!(deltas.len(), 100);
        assert_eq!(snapshots.iter().next(), Some(&300));
        assert_eq!(deltas.iter().next(), Some(&400));
    }
}
