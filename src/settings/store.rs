//! Key-value settings store interface
//!
//! Mirrors the browser extension storage model: `get(keys)`, `set(partial)`
//! and a change stream delivering `{key: {oldValue, newValue}}` per
//! namespace. Values are plain JSON.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Namespace every store in this crate publishes under
pub const LOCAL_NAMESPACE: &str = "local";

/// Capacity of the change broadcast; a lagging subscriber reloads in full
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// One key's transition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// `None` when the key was removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// A batch of key transitions from one write
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    pub namespace: String,
    pub changes: BTreeMap<String, StorageChange>,
}

impl ChangeSet {
    /// Compute the transitions between two stored documents
    pub fn diff(namespace: &str, old: &Map<String, Value>, new: &Map<String, Value>) -> Self {
        let mut changes = BTreeMap::new();

        for (key, value) in new {
            if old.get(key) != Some(value) {
                changes.insert(
                    key.clone(),
                    StorageChange {
                        old_value: old.get(key).cloned(),
                        new_value: Some(value.clone()),
                    },
                );
            }
        }
        for (key, value) in old {
            if !new.contains_key(key) {
                changes.insert(
                    key.clone(),
                    StorageChange {
                        old_value: Some(value.clone()),
                        new_value: None,
                    },
                );
            }
        }

        Self {
            namespace: namespace.to_string(),
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }
}

/// Persistent key-value store with change notification
pub trait SettingsStore: Send + Sync {
    /// Read the given keys; absent keys are simply missing from the result
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>>;

    /// Merge `partial` into the store and notify subscribers of what changed
    fn set(&self, partial: Map<String, Value>) -> Result<()>;

    /// Subscribe to change batches
    fn subscribe(&self) -> broadcast::Receiver<ChangeSet>;
}

pub(crate) fn select_keys(values: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|k| values.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

pub(crate) fn lock_err<T>(_: PoisonError<T>) -> Error {
    Error::settings("settings store lock poisoned")
}

/// In-memory store, for embedding and tests
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<ChangeSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_values(Map::new())
    }

    pub fn with_values(values: Map<String, Value>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(values),
            changes,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let values = self.values.lock().map_err(lock_err)?;
        Ok(select_keys(&values, keys))
    }

    fn set(&self, partial: Map<String, Value>) -> Result<()> {
        let change = {
            let mut values = self.values.lock().map_err(lock_err)?;
            let before = values.clone();
            values.extend(partial);
            ChangeSet::diff(LOCAL_NAMESPACE, &before, &values)
        };

        if !change.is_empty() {
            // No subscribers is fine
            let _ = self.changes.send(change);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_diff_reports_added_changed_removed() {
        let old = map(json!({ "a": 1, "b": true, "gone": "x" }));
        let new = map(json!({ "a": 2, "b": true, "c": null }));
        let diff = ChangeSet::diff("local", &old, &new);

        assert_eq!(diff.changes.len(), 3);
        assert_eq!(diff.changes["a"].old_value, Some(json!(1)));
        assert_eq!(diff.changes["a"].new_value, Some(json!(2)));
        assert_eq!(diff.changes["c"].old_value, None);
        assert_eq!(diff.changes["gone"].new_value, None);
        assert!(!diff.contains("b"));
    }

    #[test]
    fn test_storage_change_wire_shape() {
        let change = StorageChange {
            old_value: Some(json!(true)),
            new_value: Some(json!(false)),
        };
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({ "oldValue": true, "newValue": false })
        );
    }

    #[tokio::test]
    async fn test_memory_store_notifies_only_on_change() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        store.set(map(json!({ "playbackSpeed": 1.5 }))).unwrap();
        store.set(map(json!({ "playbackSpeed": 1.5 }))).unwrap();
        store.set(map(json!({ "quizSkipEnabled": true }))).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.namespace, LOCAL_NAMESPACE);
        assert!(first.contains("playbackSpeed"));

        let second = rx.recv().await.unwrap();
        assert!(second.contains("quizSkipEnabled"));
        assert!(!second.contains("playbackSpeed"));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_memory_store_get_selects_keys() {
        let store = MemoryStore::with_values(map(json!({ "a": 1, "b": 2 })));
        let got = store.get(&["a", "missing"]).unwrap();
        assert_eq!(got, map(json!({ "a": 1 })));
    }
}
