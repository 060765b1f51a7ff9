//! Visibility spoof
//!
//! Runs in the page's main world at document start so it wins every race
//! with the page's own listeners. Expects `bridgeEnabled()` in scope.

use serde::Deserialize;

/// Marker guarding re-installation in the same document
pub const SPOOF_MARKER: &str = "courseplay.spoof";

/// Overrides `visibilityState`, `hidden` and `hasFocus()`, swallows
/// window-level `visibilitychange`/`blur`, and wraps `requestAnimationFrame`
/// so one throwing callback cannot break the page's render loop.
///
/// The real values are taken from `Document.prototype`, so when the bridge
/// says "off" the getters fall through to what the browser reports.
pub const SPOOF_SCRIPT: &str = r#"
if (!window[Symbol.for('courseplay.spoof')]) {
    Object.defineProperty(window, Symbol.for('courseplay.spoof'), { value: true });

    const proto = Document.prototype;
    const realVisibility = Object.getOwnPropertyDescriptor(proto, 'visibilityState');
    const realHidden = Object.getOwnPropertyDescriptor(proto, 'hidden');
    const realHasFocus = proto.hasFocus;

    Object.defineProperty(document, 'visibilityState', {
        get: function () {
            return bridgeEnabled() ? 'visible' : realVisibility.get.call(document);
        },
        configurable: true
    });

    Object.defineProperty(document, 'hidden', {
        get: function () {
            return bridgeEnabled() ? false : realHidden.get.call(document);
        },
        configurable: true
    });

    Object.defineProperty(document, 'hasFocus', {
        value: function hasFocus() {
            return bridgeEnabled() ? true : realHasFocus.call(document);
        },
        configurable: true,
        writable: true
    });

    // Capture on window runs before anything the page registers later.
    // Element blur (inputs losing focus) is left alone: forms validate and
    // autosave on it, and it says nothing about the tab being backgrounded.
    const swallow = (event) => {
        if (!bridgeEnabled()) return;
        if (event.target === window || event.target === document) {
            event.stopImmediatePropagation();
        }
    };
    window.addEventListener('visibilitychange', swallow, true);
    window.addEventListener('blur', swallow, true);

    const realRaf = window.requestAnimationFrame;
    if (typeof realRaf === 'function') {
        window.requestAnimationFrame = function requestAnimationFrame(callback) {
            return realRaf.call(window, function (timestamp) {
                try {
                    callback(timestamp);
                } catch (e) {
                    console.error('[courseplay] requestAnimationFrame callback error:', e);
                }
            });
        };
    }

    console.log('[courseplay] Overrides applied.');
}
"#;

/// Expression sampling what the page currently sees
pub const VISIBILITY_PROBE: &str =
    "({ visibilityState: document.visibilityState, hidden: document.hidden, hasFocus: document.hasFocus() })";

/// Result of `VISIBILITY_PROBE`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityReport {
    pub visibility_state: String,
    pub hidden: bool,
    pub has_focus: bool,
}

impl VisibilityReport {
    /// All three signals say "foreground"
    pub fn is_foreground(&self) -> bool {
        self.visibility_state == "visible" && !self.hidden && self.has_focus
    }
}
