//! Fixed-capacity history with drop-oldest eviction

use std::collections::VecDeque;

/// Append-only buffer that keeps the most recent `capacity` items
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.items.iter()
    }
}

impl<T: Clone> BoundedHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_exceeds_capacity() {
        let mut history = BoundedHistory::new(5);
        for i in 0..100 {
            history.push(i);
            assert!(history.len() <= 5);
        }
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn test_keeps_most_recent_in_order() {
        let mut history = BoundedHistory::new(3);
        for i in 1..=7 {
            history.push(i);
        }

        assert_eq!(history.to_vec(), vec![5, 6, 7]);
        assert_eq!(history.latest(), Some(&7));
    }

    #[test]
    fn test_zero_capacity_is_treated_as_one() {
        let mut history = BoundedHistory::new(0);
        history.push("a");
        history.push("b");
        assert_eq!(history.to_vec(), vec!["b"]);
    }
}
