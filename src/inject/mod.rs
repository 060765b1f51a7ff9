//! Page-side scripts
//!
//! Everything the agent runs inside the page is assembled here into one
//! script, registered to run at document start in the page's main world.
//! The pieces share one function scope:
//!
//! - `bridge`: reads the override flag written by the agent
//! - `spoof`: the visibility and focus overrides
//! - `controls`: next/quiz lookup and the per-element action primitives
//! - `watcher`: element registry, discovery, observer, listeners
//!
//! The result exposes a frozen API object under a registered symbol which
//! the agent calls through [`api_call`].

pub mod bridge;
pub mod controls;
pub mod spoof;
pub mod watcher;

pub use bridge::{BridgeWriter, BRIDGE_ATTRIBUTE};
pub use spoof::VisibilityReport;
pub use watcher::{ControlKind, ControlSnapshot, Discovery, MediaId, MediaSnapshot, PageReport};

use serde_json::Value;

use crate::selectors::SelectorSet;

/// Name of the CDP binding the page reports through
pub const BINDING_NAME: &str = "__courseplayReport";

/// `Symbol.for` key of the page API object
pub const API_KEY: &str = "courseplay.api";

/// Quote a string as a JS literal
pub(crate) fn js_string(value: &str) -> String {
    Value::String(value.to_owned()).to_string()
}

/// Render a list of strings as a JS array literal
pub(crate) fn js_list(values: &[String]) -> String {
    Value::from(values.to_vec()).to_string()
}

/// Build the full document-start script.
///
/// `initial_enabled` is the fallback the bridge reader uses before the agent
/// has written the attribute into the new document.
pub fn build_page_script(selectors: &SelectorSet, initial_enabled: bool) -> String {
    let api_key = js_string(API_KEY);
    let scripts = [
        "'use strict';".to_string(),
        bridge::reader_script(initial_enabled),
        spoof::SPOOF_SCRIPT.to_string(),
        format!("if (window[Symbol.for({api_key})]) return;"),
        watcher::registry_script(selectors, BINDING_NAME),
        controls::controls_script(selectors),
        watcher::WATCHER_SCRIPT.to_string(),
        format!(
            r#"
Object.defineProperty(window, Symbol.for({api_key}), {{
    value: Object.freeze({{ discover, attach, setRate, seek, toggle, clickNext, dismissPrompts }}),
    enumerable: false
}});
"#
        ),
    ];

    // Wrap in IIFE
    format!("(function(){{{}}})();", scripts.join("\n"))
}

/// Expression invoking one API method with JSON-encoded arguments.
///
/// Throws in the page if the API is missing, which surfaces as
/// `exceptionDetails` on the evaluate result.
pub fn api_call(method: &str, args: &[Value]) -> String {
    let args = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "(() => {{ const api = window[Symbol.for({key})]; if (!api) throw new Error('courseplay API not installed'); return api.{method}({args}); }})()",
        key = js_string(API_KEY),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_is_wrapped_in_iife() {
        let script = build_page_script(&SelectorSet::default(), true);
        assert!(script.starts_with("(function(){'use strict';"));
        assert!(script.ends_with("})();"));
    }

    #[test]
    fn test_script_order() {
        let script = build_page_script(&SelectorSet::default(), false);
        let bridge = script.find("const bridgeEnabled").unwrap();
        let spoof = script.find("'visibilityState'").unwrap();
        let guard = script.find("if (window[Symbol.for(\"courseplay.api\")]) return;").unwrap();
        let watcher = script.find("const discover").unwrap();
        assert!(bridge < spoof);
        assert!(spoof < guard);
        assert!(guard < watcher);
        assert!(script.contains("const BRIDGE_INITIAL = false;"));
    }

    #[test]
    fn test_script_exports_api() {
        let script = build_page_script(&SelectorSet::default(), true);
        for name in [
            "discover",
            "attach",
            "setRate",
            "seek",
            "toggle",
            "clickNext",
            "dismissPrompts",
        ] {
            assert!(script.contains(&format!("const {name} = ")), "{name}");
        }
        assert!(script.contains("Object.freeze({ discover, attach"));
    }

    #[test]
    fn test_api_call() {
        assert_eq!(
            api_call("setRate", &[json!(3), json!(1.5)]),
            "(() => { const api = window[Symbol.for(\"courseplay.api\")]; if (!api) throw new Error('courseplay API not installed'); return api.setRate(3, 1.5); })()"
        );
        assert!(api_call("discover", &[]).contains("api.discover()"));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a\"b"), r#""a\"b""#);
        assert_eq!(js_list(&["x".into(), "y".into()]), r#"["x","y"]"#);
    }
}
