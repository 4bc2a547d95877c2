use crate::app::types::RecordSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The entries held by one node, keyed by application key.
///
/// Values are opaque JSON. Serializes as a plain JSON object, which is also the body of a
/// `SEND_DATA` response and the on-disk snapshot format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyShard {
    entries: BTreeMap<String, Value>,
}

impl KeyShard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Removes `key` only if it still maps to `expected`. A concurrent overwrite keeps the
    /// newer value local so the next rebalance pass can move it.
    pub fn remove_if_unchanged(&mut self, key: &str, expected: &Value) -> bool {
        if self.entries.get(key) == Some(expected) {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Folds a replica snapshot into this shard. Entries already present locally win.
    ///
    /// Returns how many entries were added.
    pub fn absorb(&mut self, replica: KeyShard) -> usize {
        let mut added = 0;
        for (key, value) in replica.entries {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.entries.entry(key) {
                slot.insert(value);
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<RecordSummary> {
        self.entries
            .iter()
            .map(|(key, value)| RecordSummary {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

impl FromIterator<(String, Value)> for KeyShard {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
