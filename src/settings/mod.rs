//! Settings Store Adapter
//!
//! Turns the raw key-value store into immutable `Settings` snapshots.
//! Every consumer reads the snapshot published on one `watch` channel, so
//! nobody can act on a field older than what another consumer has seen.

mod file;
mod store;

pub use file::FileStore;
pub use store::{ChangeSet, MemoryStore, SettingsStore, StorageChange, LOCAL_NAMESPACE};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Storage keys, as the settings UI writes them
pub mod keys {
    pub const OVERRIDE_ENABLED: &str = "overrideEnabled";
    pub const AUTO_NEXT_ENABLED: &str = "autoNextEnabled";
    pub const PLAYBACK_SPEED: &str = "playbackSpeed";
    pub const QUIZ_SKIP_ENABLED: &str = "quizSkipEnabled";
    pub const SMART_SKIP_ENABLED: &str = "smartSkipEnabled";
    pub const SKIP_DURATION: &str = "skipDuration";

    pub const ALL: &[&str] = &[
        OVERRIDE_ENABLED,
        AUTO_NEXT_ENABLED,
        PLAYBACK_SPEED,
        QUIZ_SKIP_ENABLED,
        SMART_SKIP_ENABLED,
        SKIP_DURATION,
    ];
}

/// User configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Master switch: visibility spoofing and every automated action
    pub override_enabled: bool,
    /// Click "next item" after a video ends
    pub auto_next_enabled: bool,
    /// Enforced playback rate (> 0)
    pub playback_speed: f64,
    /// Click visible quiz/continue prompts
    pub quiz_skip_enabled: bool,
    /// Jump past the intro once per video
    pub smart_skip_enabled: bool,
    /// Intro-skip threshold in seconds (>= 0)
    pub skip_duration: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            override_enabled: true,
            auto_next_enabled: false,
            playback_speed: 1.0,
            quiz_skip_enabled: false,
            smart_skip_enabled: false,
            skip_duration: 10.0,
        }
    }
}

impl Settings {
    /// Build a snapshot from stored values.
    ///
    /// Never fails: a missing or ill-typed field falls back to its default.
    /// `overrideEnabled` is on unless explicitly `false`.
    pub fn from_values(values: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            values.get(key).and_then(Value::as_bool).unwrap_or(default)
        };

        let playback_speed = values
            .get(keys::PLAYBACK_SPEED)
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(defaults.playback_speed);

        let skip_duration = values
            .get(keys::SKIP_DURATION)
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .unwrap_or(defaults.skip_duration);

        Self {
            override_enabled: values.get(keys::OVERRIDE_ENABLED) != Some(&Value::Bool(false)),
            auto_next_enabled: flag(keys::AUTO_NEXT_ENABLED, defaults.auto_next_enabled),
            playback_speed,
            quiz_skip_enabled: flag(keys::QUIZ_SKIP_ENABLED, defaults.quiz_skip_enabled),
            smart_skip_enabled: flag(keys::SMART_SKIP_ENABLED, defaults.smart_skip_enabled),
            skip_duration,
        }
    }

    /// Stored representation
    pub fn to_values(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(values)) => values,
            _ => Map::new(),
        }
    }

    /// Snapshot after applying a change batch (foreign namespaces are ignored)
    pub fn apply(&self, change: &ChangeSet) -> Self {
        if change.namespace != LOCAL_NAMESPACE {
            return self.clone();
        }

        let mut values = self.to_values();
        for (key, transition) in &change.changes {
            match &transition.new_value {
                Some(value) => {
                    values.insert(key.clone(), value.clone());
                }
                None => {
                    values.remove(key);
                }
            }
        }
        Self::from_values(&values)
    }

    /// Status text the settings UI shows under the master toggle
    pub fn status_line(&self) -> &'static str {
        if self.override_enabled {
            "Extension is currently active. Your videos will keep playing even if you switch tabs."
        } else {
            "Extension is disabled. The course page will pause videos when you switch tabs."
        }
    }
}

/// Read/subscribe wrapper over a `SettingsStore`
pub struct SettingsAdapter {
    store: Arc<dyn SettingsStore>,
    current: watch::Sender<Arc<Settings>>,
}

impl SettingsAdapter {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        let (current, _) = watch::channel(Arc::new(Settings::default()));
        Self { store, current }
    }

    /// Load the full configuration and publish it.
    ///
    /// A failing store yields defaults rather than an error.
    pub async fn load(&self) -> Arc<Settings> {
        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || store.get(keys::ALL))
            .await
            .map_err(|e| Error::settings(format!("settings load task failed: {}", e)))
            .and_then(|r| r);

        let settings = match loaded {
            Ok(values) => Arc::new(Settings::from_values(&values)),
            Err(e) => {
                tracing::warn!("Failed to load settings, using defaults: {}", e);
                Arc::new(Settings::default())
            }
        };

        tracing::info!(
            "Initial state: {}",
            if settings.override_enabled {
                "Enabled"
            } else {
                "Disabled"
            }
        );
        self.current.send_replace(Arc::clone(&settings));
        settings
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.borrow().clone()
    }

    /// Receive every new snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.current.subscribe()
    }

    /// Fold a change batch into the current snapshot.
    ///
    /// Returns the new snapshot if anything we care about changed.
    pub fn apply_changes(&self, change: &ChangeSet) -> Option<Arc<Settings>> {
        let current = self.snapshot();
        let next = current.apply(change);
        if next == *current {
            return None;
        }

        if next.override_enabled != current.override_enabled {
            tracing::info!(
                "State changed: {}",
                if next.override_enabled {
                    "Enabled"
                } else {
                    "Disabled"
                }
            );
        }

        let next = Arc::new(next);
        self.current.send_replace(Arc::clone(&next));
        Some(next)
    }

    /// Forward store notifications into snapshots until the store goes away
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let adapter = Arc::clone(self);
        let mut changes = self.store.subscribe();

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        adapter.apply_changes(&change);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Missed {} settings notifications, reloading", missed);
                        adapter.load().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Persist a new playback speed (the keyboard speed cycle)
    pub async fn set_playback_speed(&self, speed: f64) -> Result<()> {
        let mut partial = Map::new();
        partial.insert(keys::PLAYBACK_SPEED.to_string(), Value::from(speed));

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.set(partial))
            .await
            .map_err(|e| Error::settings(format!("settings write task failed: {}", e)))?
    }
}
