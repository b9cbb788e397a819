/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store updates to the App-mutable state.

use std::collections::{hash_map, hash_set, HashMap, HashSet};

/// Set of key-value updates to the committed app state that are written when a particular block is
/// committed.
///
/// # Uniqueness of Key between `inserts` and `deletes`
///
/// A key is never both in `inserts` and `deletes`: the later of [`insert`](Self::insert) and
/// [`delete`](Self::delete) wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppStateUpdates {
    inserts: HashMap<Vec<u8>, Vec<u8>>,
    deletes: HashSet<Vec<u8>>,
}

impl AppStateUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the insertion of a `key`-`value` pair. Cancels a previously scheduled deletion of `key`.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.deletes.remove(&key);
        self.inserts.insert(key, value);
    }

    /// Schedule the deletion of `key`. Cancels a previously scheduled insertion of `key`.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.inserts.remove(&key);
        self.deletes.insert(key);
    }

    pub fn get_insert(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.inserts.get(key)
    }

    pub fn contains_delete(&self, key: &[u8]) -> bool {
        self.deletes.contains(key)
    }

    pub fn inserts(&self) -> hash_map::Iter<Vec<u8>, Vec<u8>> {
        self.inserts.iter()
    }

    pub fn deletes(&self) -> hash_set::Iter<Vec<u8>> {
        self.deletes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_operation_on_a_key_wins() {
        let mut updates = AppStateUpdates::new();
        updates.insert(vec![1], vec![10]);
        updates.delete(vec![1]);
        assert!(updates.get_insert(&[1]).is_none());
        assert!(updates.contains_delete(&[1]));

        updates.insert(vec![1], vec![11]);
        assert_eq!(updates.get_insert(&[1]), Some(&vec![11]));
        assert!(!updates.contains_delete(&[1]));
    }
}
