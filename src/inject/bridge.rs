//! Context Bridge
//!
//! The Rust side and the page's own script world share no memory. The only
//! channel between them is one attribute on `document.documentElement`:
//! Rust writes it through `Runtime.evaluate`, the page-side spoof reads it on
//! every getter call. Nothing is cached on the page side, so a write is
//! visible to the very next read.

use crate::cdp::Session;
use crate::error::{Error, Result};

use super::js_string;

/// Attribute carrying the spoof state (`"true"` / `"false"`)
pub const BRIDGE_ATTRIBUTE: &str = "data-courseplay-override";

/// Page-side reader.
///
/// Declares `bridgeEnabled()` for the rest of the page script. Until the root
/// element exists (document start) or while the attribute is absent, the
/// last state known when the script was registered is used, and the
/// attribute is seeded with it as soon as the root appears.
pub fn reader_script(initial: bool) -> String {
    format!(
        r#"
const BRIDGE_ATTR = {attr};
const BRIDGE_INITIAL = {initial};
const bridgeEnabled = () => {{
    const root = document.documentElement;
    const value = root ? root.getAttribute(BRIDGE_ATTR) : null;
    return value === null ? BRIDGE_INITIAL : value === 'true';
}};
const seedBridge = () => {{
    const root = document.documentElement;
    if (root && !root.hasAttribute(BRIDGE_ATTR)) {{
        root.setAttribute(BRIDGE_ATTR, String(BRIDGE_INITIAL));
    }}
}};
seedBridge();
document.addEventListener('readystatechange', seedBridge);
"#,
        attr = js_string(BRIDGE_ATTRIBUTE),
        initial = initial,
    )
}

/// Expression writing the state; evaluates to `false` if there is no root yet
pub fn write_expression(enabled: bool) -> String {
    format!(
        "(() => {{ const root = document.documentElement; if (!root) return false; root.setAttribute({attr}, {value}); return true; }})()",
        attr = js_string(BRIDGE_ATTRIBUTE),
        value = js_string(if enabled { "true" } else { "false" }),
    )
}

/// Expression reading the raw attribute (`null` when absent)
pub fn read_expression() -> String {
    format!(
        "(() => {{ const root = document.documentElement; return root ? root.getAttribute({attr}) : null; }})()",
        attr = js_string(BRIDGE_ATTRIBUTE),
    )
}

/// Interpret a raw attribute value the way the page side does
pub fn parse_state(raw: Option<&str>) -> Option<bool> {
    raw.map(|v| v == "true")
}

/// Writer half of the bridge (Rust side)
pub struct BridgeWriter<'a> {
    session: &'a Session,
}

impl<'a> BridgeWriter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Publish the spoof state to the current document
    pub async fn sync(&self, enabled: bool) -> Result<()> {
        let result = self.session.evaluate(&write_expression(enabled)).await?;
        if let Some(details) = result.exception_details {
            return Err(Error::Script(details.message()));
        }

        let written = result
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if written {
            tracing::debug!("Bridge synced: {}", enabled);
        } else {
            // The document-start seed covers this document once its root exists
            tracing::debug!("Bridge sync deferred, no document root yet");
        }
        Ok(())
    }

    /// Read back what the page side currently sees
    pub async fn read(&self) -> Result<Option<bool>> {
        let result = self.session.evaluate(&read_expression()).await?;
        if let Some(details) = result.exception_details {
            return Err(Error::Script(details.message()));
        }
        Ok(parse_state(
            result.result.value.as_ref().and_then(|v| v.as_str()),
        ))
    }
}
