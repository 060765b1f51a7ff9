//! JSON-file settings store
//!
//! The document is a flat JSON object keyed like the extension storage
//! (`overrideEnabled`, `playbackSpeed`, ...). Writes go through a temp file
//! and a rename. A `notify` watcher on the parent directory picks up edits
//! made by other processes (a settings UI, a text editor) and publishes the
//! diff against the last known content, so our own writes are not echoed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::store::{
    lock_err, select_keys, ChangeSet, SettingsStore, CHANGE_CHANNEL_CAPACITY, LOCAL_NAMESPACE,
};
use crate::error::{Error, Result};

struct Inner {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<ChangeSet>,
}

/// Settings store persisted as a JSON file
pub struct FileStore {
    inner: Arc<Inner>,
    watcher: Option<RecommendedWatcher>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store. An unreadable or malformed file is
    /// logged and treated as empty; it is only overwritten on the next `set`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match read_document(&path) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Ignoring unreadable settings file {:?}: {}", path, e);
                Map::new()
            }
        };

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                values: Mutex::new(values),
                changes,
            }),
            watcher: None,
        })
    }

    /// Start watching the file for external edits
    pub fn watch(mut self) -> Result<Self> {
        let dir = match self.inner.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let inner = Arc::clone(&self.inner);
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == inner.path.file_name());
                    if ours {
                        inner.reload();
                    }
                }
                Err(e) => tracing::warn!("Settings watcher error: {}", e),
            })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::debug!("Watching settings file {:?}", self.inner.path);
        self.watcher = Some(watcher);
        Ok(self)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl Inner {
    /// Re-read the file and publish whatever differs from the cache
    fn reload(&self) {
        let fresh = match read_document(&self.path) {
            Ok(values) => values,
            Err(e) => {
                // Often a half-written file from an editor; the next event will settle it
                tracing::debug!("Skipping settings reload: {}", e);
                return;
            }
        };

        let change = match self.values.lock() {
            Ok(mut values) => {
                let change = ChangeSet::diff(LOCAL_NAMESPACE, &values, &fresh);
                *values = fresh;
                change
            }
            Err(_) => return,
        };

        if !change.is_empty() {
            tracing::info!(
                "Settings file changed externally: {:?}",
                change.changes.keys().collect::<Vec<_>>()
            );
            let _ = self.changes.send(change);
        }
    }

    fn write(&self, values: &Map<String, Value>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let values = self.inner.values.lock().map_err(lock_err)?;
        Ok(select_keys(&values, keys))
    }

    fn set(&self, partial: Map<String, Value>) -> Result<()> {
        let change = {
            let mut values = self.inner.values.lock().map_err(lock_err)?;
            let mut next = values.clone();
            next.extend(partial);
            let change = ChangeSet::diff(LOCAL_NAMESPACE, &values, &next);
            if change.is_empty() {
                return Ok(());
            }
            self.inner.write(&next)?;
            *values = next;
            change
        };

        let _ = self.inner.changes.send(change);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.inner.changes.subscribe()
    }
}

fn read_document(path: &Path) -> Result<Map<String, Value>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };

    if text.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(&text)? {
        Value::Object(values) => Ok(values),
        other => Err(Error::settings(format!(
            "settings file must hold a JSON object, found {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
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
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("settings.json")).unwrap();
        assert!(store.get(&["overrideEnabled"]).unwrap().is_empty());
    }

    #[test]
    fn test_set_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = FileStore::open(&path).unwrap();
        store
            .set(map(json!({ "playbackSpeed": 1.75, "autoNextEnabled": true })))
            .unwrap();

        let reopened = FileStore::open(&path).unwrap();
        let values = reopened.get(&["playbackSpeed", "autoNextEnabled"]).unwrap();
        assert_eq!(values["playbackSpeed"], json!(1.75));
        assert_eq!(values["autoNextEnabled"], json!(true));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get(&["playbackSpeed"]).unwrap().is_empty());
    }

    #[test]
    fn test_non_object_document_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[true]").unwrap();
        assert!(matches!(read_document(&path), Err(Error::Settings(_))));
    }

    #[tokio::test]
    async fn test_external_edit_publishes_diff_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = FileStore::open(&path).unwrap();
        store.set(map(json!({ "overrideEnabled": true }))).unwrap();
        let mut rx = store.subscribe();

        std::fs::write(&path, r#"{ "overrideEnabled": false }"#).unwrap();
        store.inner.reload();
        // Second reload of the same content is a no-op
        store.inner.reload();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.changes["overrideEnabled"].new_value, Some(json!(false)));
        assert!(rx.try_recv().is_err());
    }
}
