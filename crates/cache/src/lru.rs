//! Recency ordering for cache entries.
//!
//! Every touch stamps the key with a fresh, strictly increasing tick, so the
//! order is total and ties cannot happen: two keys touched in sequence are
//! always ordered by that sequence.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Keys ordered from least to most recently used.
#[derive(Debug)]
pub(crate) struct LruList<K> {
    /// tick -> key, oldest first
    order: BTreeMap<u64, K>,
    /// key -> tick of its last touch
    ticks: HashMap<K, u64>,
    next_tick: u64,
}

impl<K: Copy + Eq + Hash> LruList<K> {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            ticks: HashMap::new(),
            next_tick: 0,
        }
    }

    /// Insert the key or move it to the most recently used end.
    pub fn touch(&mut self, key: K) {
        if let Some(old_tick) = self.ticks.remove(&key) {
            self.order.remove(&old_tick);
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key);
        self.ticks.insert(key, tick);
    }

    /// Remove the key. Returns false if it was not present.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.ticks.remove(key) {
            Some(tick) => {
                self.order.remove(&tick);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        self.ticks.contains_key(key)
    }

    /// Keys from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        self.order.values()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &LruList<u32>) -> Vec<u32> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_insertion_order() {
        let mut list = LruList::new();
        for key in [3, 1, 2, 4] {
            list.touch(key);
        }
        assert_eq!(order(&list), vec![3, 1, 2, 4]);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_touch_moves_to_back() {
        let mut list = LruList::new();
        list.touch(1);
        list.touch(2);
        list.touch(3);
        list.touch(1);
        assert_eq!(order(&list), vec![2, 3, 1]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_remove() {
        let mut list = LruList::new();
        list.touch(1);
        list.touch(2);
        assert!(list.remove(&1));
        assert!(!list.remove(&1));
        assert!(!list.contains(&1));
        assert_eq!(order(&list), vec![2]);

        assert!(list.remove(&2));
        assert!(list.is_empty());
    }
}
