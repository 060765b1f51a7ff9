//! Course Page
//!
//! A browser tab with the page-side agent script installed. Wraps the CDP
//! session with typed calls into the page API and turns raw CDP events into
//! [`PageEvent`]s.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::cdp::types::{PageLoadEventFiredEvent, RuntimeBindingCalledEvent};
use crate::cdp::Session;
use crate::engine::PageEvent;
use crate::error::{Error, Result};
use crate::inject::{
    api_call, build_page_script, spoof::VISIBILITY_PROBE, BridgeWriter, Discovery, MediaId,
    PageReport, VisibilityReport, BINDING_NAME,
};
use crate::selectors::SelectorSet;

/// Registered document-start script and the bridge fallback baked into it
#[derive(Debug, Clone)]
struct InstalledScript {
    identifier: String,
    initial_enabled: bool,
}

/// Translate one raw CDP event into a page event, if it is one we consume
pub(crate) fn translate_event(method: &str, params: Value) -> Option<PageEvent> {
    match method {
        "Page.loadEventFired" => {
            if let Ok(load) = serde_json::from_value::<PageLoadEventFiredEvent>(params) {
                tracing::trace!("Load event at {}", load.timestamp);
            }
            Some(PageEvent::DocumentReady)
        }
        "Runtime.bindingCalled" => {
            let call: RuntimeBindingCalledEvent = match serde_json::from_value(params) {
                Ok(call) => call,
                Err(e) => {
                    tracing::warn!("Malformed bindingCalled event: {}", e);
                    return None;
                }
            };
            if call.name != BINDING_NAME {
                return None;
            }
            match PageReport::parse(&call.payload) {
                Ok(report) => Some(report.into()),
                Err(e) => {
                    tracing::warn!("Ignoring page report {:?}: {}", call.payload, e);
                    None
                }
            }
        }
        _ => None,
    }
}

/// A course tab driven by the agent
pub struct CoursePage {
    session: Session,
    selectors: Arc<SelectorSet>,
    script: Option<InstalledScript>,
}

impl CoursePage {
    pub(crate) fn new(session: Session, selectors: Arc<SelectorSet>) -> Self {
        Self {
            session,
            selectors,
            script: None,
        }
    }

    /// Get the underlying CDP session
    pub fn session(&self) -> &Session {
        &self.session
    }

    // =========================================================================
    // Script installation
    // =========================================================================

    /// Expose the report binding and register the page script for every new
    /// document. The script is also run once in the current document.
    pub async fn install_scripts(&mut self, enabled: bool) -> Result<()> {
        self.session.add_binding(BINDING_NAME).await?;
        self.register_script(enabled).await?;

        let source = build_page_script(&self.selectors, enabled);
        if let Err(e) = self.execute(&source).await {
            tracing::debug!("Page script not applied to current document: {}", e);
        }
        Ok(())
    }

    async fn register_script(&mut self, enabled: bool) -> Result<()> {
        if let Some(old) = self.script.take() {
            self.session
                .remove_script_to_evaluate_on_new_document(&old.identifier)
                .await?;
        }

        let source = build_page_script(&self.selectors, enabled);
        let identifier = self
            .session
            .add_script_to_evaluate_on_new_document(&source)
            .await?;
        tracing::debug!("Registered page script {} (override {})", identifier, enabled);

        self.script = Some(InstalledScript {
            identifier,
            initial_enabled: enabled,
        });
        Ok(())
    }

    /// Publish the override flag to the current document and make sure the
    /// next document starts from the same value
    pub async fn sync_bridge(&mut self, enabled: bool) -> Result<()> {
        BridgeWriter::new(&self.session).sync(enabled).await?;

        let stale = self
            .script
            .as_ref()
            .is_some_and(|s| s.initial_enabled != enabled);
        if stale {
            self.register_script(enabled).await?;
        }
        Ok(())
    }

    /// Raw bridge attribute as the page sees it
    pub async fn bridge_state(&self) -> Result<Option<bool>> {
        BridgeWriter::new(&self.session).read().await
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        let result = self.session.navigate(url).await?;
        if let Some(error) = result.error_text {
            return Err(Error::Navigation(error));
        }
        Ok(())
    }

    /// Reload the page
    pub async fn reload(&self) -> Result<()> {
        self.session.reload(false).await
    }

    /// Get current URL
    pub async fn url(&self) -> Result<String> {
        let frame_tree = self.session.get_frame_tree().await?;
        Ok(frame_tree.frame.url)
    }

    /// Wait until `document.readyState` is `complete`
    pub async fn wait_for_navigation(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);

        loop {
            // readyState is unavailable mid-navigation, keep polling
            if let Ok(result) = self.session.evaluate("document.readyState").await {
                if result.result.value.as_ref().and_then(Value::as_str) == Some("complete") {
                    return Ok(());
                }
            }

            if start.elapsed() > timeout {
                return Err(Error::Timeout(format!(
                    "Navigation did not complete within {}ms",
                    timeout.as_millis()
                )));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    // =========================================================================
    // JavaScript Evaluation
    // =========================================================================

    /// Evaluate JavaScript and deserialize the result (`undefined` reads as `null`)
    pub async fn evaluate<T: serde::de::DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let result = self.session.evaluate(expression).await?;

        if let Some(exception) = result.exception_details {
            return Err(Error::Script(format!(
                "{} at {}:{}",
                exception.message(),
                exception.line_number,
                exception.column_number
            )));
        }

        let value = result.result.value.unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// Execute JavaScript without expecting a return value
    pub async fn execute(&self, expression: &str) -> Result<()> {
        self.evaluate::<Value>(expression).await.map(|_| ())
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, args: &[Value]) -> Result<T> {
        self.evaluate(&api_call(method, args)).await
    }

    // =========================================================================
    // Page API
    // =========================================================================

    /// Current media elements and controls
    pub async fn discover(&self) -> Result<Discovery> {
        self.call("discover", &[]).await
    }

    /// Attach playback listeners; `false` if already attached or gone
    pub async fn attach_listeners(&self, id: MediaId) -> Result<bool> {
        self.call("attach", &[json!(id)]).await
    }

    /// `None` if the element is gone, `Some(false)` if the rate was already right
    pub async fn set_playback_rate(&self, id: MediaId, rate: f64) -> Result<Option<bool>> {
        self.call("setRate", &[json!(id), json!(rate)]).await
    }

    pub async fn seek(&self, id: MediaId, position: f64) -> Result<Option<bool>> {
        self.call("seek", &[json!(id), json!(position)]).await
    }

    /// New state (`"playing"` / `"paused"`), `None` if the element is gone
    pub async fn toggle_playback(&self, id: MediaId) -> Result<Option<String>> {
        self.call("toggle", &[json!(id)]).await
    }

    /// Click the "next item" control. Returns what matched it.
    pub async fn click_next(&self) -> Result<Option<String>> {
        self.call("clickNext", &[]).await
    }

    /// Click every visible quiz/continue prompt; returns how many
    pub async fn dismiss_prompts(&self) -> Result<u32> {
        self.call("dismissPrompts", &[]).await
    }

    /// What the page currently believes about its visibility
    pub async fn visibility(&self) -> Result<VisibilityReport> {
        self.evaluate(VISIBILITY_PROBE).await
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Next page event; `None` once the browser connection is gone
    pub async fn next_event(&self) -> Option<PageEvent> {
        loop {
            let (method, params) = self.session.next_event().await?;
            if let Some(event) = translate_event(&method, params) {
                return Some(event);
            }
        }
    }
}
