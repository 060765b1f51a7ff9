//! Mutation Watcher
//!
//! Page side: a registry handing out stable numeric ids for media elements,
//! a `MutationObserver` on `document.body`, media listeners attached on
//! request, and a page-wide keydown listener. Everything is reported through
//! the CDP binding as one JSON object per event.
//!
//! Rust side: the payload types (`PageReport`) and the discovery snapshot.

use serde::Deserialize;

use crate::selectors::SelectorSet;

use super::js_string;

/// Page-side handle for a media element. Only meaningful within one document.
pub type MediaId = u32;

/// Shared helpers: reporting, element registry, visibility, safe queries
pub fn registry_script(selectors: &SelectorSet, binding: &str) -> String {
    format!(
        r#"
const MEDIA_SELECTOR = {media};
const TEXT_INPUT_SELECTOR = {text_input};
const num = (value, fallback) => (Number.isFinite(value) ? value : fallback);
const report = (message) => {{
    const send = window[{binding}];
    if (typeof send !== 'function') return;
    try {{
        send(JSON.stringify(message));
    }} catch (e) {{}}
}};
const queryAll = (selector) => {{
    try {{
        return Array.from(document.querySelectorAll(selector));
    }} catch (e) {{
        return [];
    }}
}};
const registry = {{ ids: new WeakMap(), refs: new Map(), attached: new WeakSet(), next: 1 }};
const idOf = (el) => {{
    let id = registry.ids.get(el);
    if (id === undefined) {{
        id = registry.next++;
        registry.ids.set(el, id);
        registry.refs.set(id, new WeakRef(el));
    }}
    return id;
}};
const lookup = (id) => {{
    const ref = registry.refs.get(id);
    const el = ref ? ref.deref() : undefined;
    if (!el) {{
        registry.refs.delete(id);
        return null;
    }}
    return el;
}};
const isVisible = (el) => {{
    if (!el || !el.isConnected) return false;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) return false;
    const style = window.getComputedStyle(el);
    return style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';
}};
const containsMedia = (node) => {{
    if (!node || node.nodeType !== 1) return false;
    try {{
        return node.matches(MEDIA_SELECTOR) || node.querySelector(MEDIA_SELECTOR) !== null;
    }} catch (e) {{
        return false;
    }}
}};
"#,
        media = js_string(&selectors.media_selector()),
        text_input = js_string(&selectors.text_input_selector()),
        binding = js_string(binding),
    )
}

/// Discovery, listener attachment, structural observer and keyboard hook
pub const WATCHER_SCRIPT: &str = r#"
const discover = () => {
    for (const [id, ref] of registry.refs) {
        if (!ref.deref()) registry.refs.delete(id);
    }
    const media = queryAll(MEDIA_SELECTOR).map((el) => ({
        id: idOf(el),
        currentTime: num(el.currentTime, 0),
        playbackRate: num(el.playbackRate, 1),
        paused: !!el.paused,
        ended: !!el.ended
    }));
    const controls = [];
    for (const selector of NEXT_SELECTORS) {
        for (const el of queryAll(selector)) {
            controls.push({ kind: 'next', selector, visible: isVisible(el) });
        }
    }
    for (const selector of QUIZ_SELECTORS) {
        for (const el of queryAll(selector)) {
            controls.push({ kind: 'quiz', selector, visible: isVisible(el) });
        }
    }
    return { media, controls };
};

const attach = (id) => {
    const el = lookup(id);
    if (!el || registry.attached.has(el)) return false;
    registry.attached.add(el);
    el.addEventListener('play', () => report({
        kind: 'play', id, currentTime: num(el.currentTime, 0), playbackRate: num(el.playbackRate, 1)
    }));
    el.addEventListener('ratechange', () => report({
        kind: 'rateChange', id, playbackRate: num(el.playbackRate, 1)
    }));
    el.addEventListener('timeupdate', () => report({
        kind: 'timeUpdate', id, currentTime: num(el.currentTime, 0)
    }));
    el.addEventListener('ended', () => report({
        kind: 'ended', id, nextAvailable: findNext() !== null
    }));
    return true;
};

const observe = () => {
    if (!document.body) return false;
    new MutationObserver((records) => {
        let addedMedia = false;
        scan: for (const record of records) {
            for (const node of record.addedNodes) {
                if (containsMedia(node)) {
                    addedMedia = true;
                    break scan;
                }
            }
        }
        report({ kind: 'mutation', addedMedia });
    }).observe(document.body, { childList: true, subtree: true });
    return true;
};
if (!observe()) {
    document.addEventListener('DOMContentLoaded', observe, { once: true });
}

document.addEventListener('keydown', (event) => {
    const target = event.target;
    let editable = false;
    if (target && target.nodeType === 1) {
        editable = !!target.isContentEditable;
        if (!editable) {
            try {
                editable = target.closest(TEXT_INPUT_SELECTOR) !== null;
            } catch (e) {}
        }
    }
    if (editable) return;
    report({
        kind: 'key',
        key: String(event.key || ''),
        editable,
        modified: !!(event.ctrlKey || event.altKey || event.metaKey)
    });
}, true);
"#;

/// One message from the page, as sent through the binding
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PageReport {
    /// A batch of structural changes under `document.body`
    #[serde(rename_all = "camelCase")]
    Mutation { added_media: bool },
    #[serde(rename_all = "camelCase")]
    Play {
        id: MediaId,
        current_time: f64,
        playback_rate: f64,
    },
    #[serde(rename_all = "camelCase")]
    RateChange { id: MediaId, playback_rate: f64 },
    #[serde(rename_all = "camelCase")]
    TimeUpdate { id: MediaId, current_time: f64 },
    /// Playback completed; `next_available` says whether a "next" control
    /// could be located at that moment
    #[serde(rename_all = "camelCase")]
    Ended { id: MediaId, next_available: bool },
    Key {
        key: String,
        editable: bool,
        modified: bool,
    },
}

impl PageReport {
    pub fn parse(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// A media element as seen at discovery time
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSnapshot {
    pub id: MediaId,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub ended: bool,
}

fn default_rate() -> f64 {
    1.0
}

/// Kind of control found during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlKind {
    Next,
    Quiz,
}

/// A control element matched by one of the configured selectors
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlSnapshot {
    pub kind: ControlKind,
    pub selector: String,
    pub visible: bool,
}

/// Everything discovery found in the current document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Discovery {
    #[serde(default)]
    pub media: Vec<MediaSnapshot>,
    #[serde(default)]
    pub controls: Vec<ControlSnapshot>,
}

impl Discovery {
    /// Controls of one kind that are currently rendered
    pub fn visible(&self, kind: ControlKind) -> impl Iterator<Item = &ControlSnapshot> {
        self.controls
            .iter()
            .filter(move |c| c.kind == kind && c.visible)
    }
}
