//! # Courseplay
//!
//! Keeps a video-learning page in the foreground, whatever the window is
//! actually doing, and optionally drives it from one lesson to the next.
//!
//! Courseplay launches Chrome over a minimal CDP client and installs a
//! document-start script in the page's own world. That script spoofs the
//! visibility signals, watches the document for media and controls, and
//! reports back through a CDP binding. A pure state machine (the engine)
//! turns those reports and the user's settings into actions.
//!
//! ## Features
//!
//! - **Visibility override** - `visibilityState`, `hidden`, `hasFocus()` and
//!   the `visibilitychange`/`blur` events
//! - **Speed enforcement** - the configured rate wins over the host player
//! - **Auto-advance** - clicks "next item" two seconds after a video ends
//! - **Quiz dismissal** and **intro skip**, each behind its own setting
//! - **Keyboard shortcuts** - `n` next, `p` play/pause, `s` cycle speed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courseplay::{Agent, AgentConfig, Browser, SettingsAdapter};
//!
//! #[tokio::main]
//! async fn main() -> courseplay::Result<()> {
//!     let config = AgentConfig::default();
//!     let adapter = Arc::new(SettingsAdapter::new(config.settings_store()?));
//!
//!     let browser = Browser::launch_with_config(config).await?;
//!     let mut agent = Agent::open(&browser, adapter, "https://www.coursera.org/learn").await?;
//!
//!     agent
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     browser.close().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod agent;
pub mod browser;
pub mod cdp;
pub mod engine;
pub mod error;
pub mod inject;
pub mod page;
pub mod selectors;
pub mod settings;

// Re-exports
pub use agent::Agent;
pub use browser::Browser;
pub use engine::{Action, Engine, PageEvent};
pub use error::{Error, Result};
pub use inject::{Discovery, MediaId, VisibilityReport};
pub use page::CoursePage;
pub use selectors::SelectorSet;
pub use settings::{
    FileStore, MemoryStore, Settings, SettingsAdapter, SettingsStore,
};

/// Agent and browser configuration.
///
/// Feature toggles are not here; they live in the settings store.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Path to Chrome/Chromium binary
    pub chrome_path: Option<String>,
    /// Headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Persistent Chrome profile (keeps the course login); `None` = temporary
    pub profile_dir: Option<PathBuf>,
    /// JSON settings file; `None` = in-memory defaults
    pub settings_path: Option<PathBuf>,
    /// Delay between a video ending and the "next" click
    pub advance_delay: Duration,
    /// Quiz prompt backstop interval
    pub quiz_poll_interval: Duration,
    /// Selectors used by the page script
    pub selectors: SelectorSet,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            viewport_width: 1280,
            viewport_height: 800,
            profile_dir: None,
            settings_path: None,
            advance_delay: Duration::from_secs(2),
            quiz_poll_interval: Duration::from_secs(2),
            selectors: SelectorSet::default(),
        }
    }
}

impl AgentConfig {
    /// Create a headless config
    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Default::default()
        }
    }

    /// Open the configured settings store.
    ///
    /// A file store is watched so external edits reach the agent.
    pub fn settings_store(&self) -> Result<Arc<dyn SettingsStore>> {
        match &self.settings_path {
            Some(path) => Ok(Arc::new(FileStore::open(path)?.watch()?)),
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = AgentConfig::default();
        assert_eq!(config.advance_delay, Duration::from_secs(2));
        assert_eq!(config.quiz_poll_interval, Duration::from_secs(2));
        assert!(!config.headless);
        assert!(AgentConfig::headless().headless);
    }

    #[test]
    fn test_file_settings_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            settings_path: Some(dir.path().join("settings.json")),
            ..Default::default()
        };
        let store = config.settings_store().unwrap();

        let mut partial = serde_json::Map::new();
        partial.insert("autoNextEnabled".into(), serde_json::Value::Bool(true));
        store.set(partial).unwrap();

        let values = store.get(&["autoNextEnabled"]).unwrap();
        assert_eq!(values["autoNextEnabled"], serde_json::Value::Bool(true));
    }
}
