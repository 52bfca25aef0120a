//! Value table: content-addressed, expiring values.
//!
//! Values are keyed by their own content hash. Expired values stay in the
//! table until a broadcast pass sweeps them; there is no background timer.

use std::collections::BTreeMap;
use std::time::SystemTime;

use tinydht_core::wire::{Key, Value};

#[derive(Debug, Default)]
pub struct ValueTable {
    values: BTreeMap<Key, Value>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. The key is always the value's own hash.
    pub fn insert(&mut self, value: Value) -> Option<Value> {
        self.values.insert(*value.hash(), value)
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        self.values.remove(key)
    }

    /// Every key in the table, expired or not, in key order.
    pub fn keys(&self) -> Vec<Key> {
        self.values.keys().copied().collect()
    }

    /// Keys of values whose deadline has passed.
    pub fn expired_keys(&self, now: SystemTime) -> Vec<Key> {
        self.values
            .values()
            .filter(|v| v.is_expired(now))
            .map(|v| *v.hash())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
