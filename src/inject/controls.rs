//! Page-side action primitives
//!
//! Small functions the agent invokes by id through the page API. Each one is
//! a no-op when its precondition no longer holds (element gone, rate already
//! right, control missing), so replaying an action is always safe.

use crate::selectors::SelectorSet;

use super::{js_list, js_string};

pub fn controls_script(selectors: &SelectorSet) -> String {
    format!(
        r#"
const NEXT_SELECTORS = {next};
const NEXT_TEXT_SCOPE = {next_scope};
const NEXT_LABELS = {next_labels};
const QUIZ_SELECTORS = {quiz};

const labelOf = (el) =>
    (el.innerText || el.textContent || el.getAttribute('aria-label') || '').trim().toLowerCase();

const findNext = () => {{
    for (const selector of NEXT_SELECTORS) {{
        for (const el of queryAll(selector)) {{
            if (!el.disabled) return {{ el, via: selector }};
        }}
    }}
    for (const el of queryAll(NEXT_TEXT_SCOPE)) {{
        if (el.disabled) continue;
        const label = labelOf(el);
        if (label && NEXT_LABELS.some((l) => label === l || label.startsWith(l + ' '))) {{
            return {{ el, via: 'text: ' + label }};
        }}
    }}
    return null;
}};

const clickNext = () => {{
    const found = findNext();
    if (!found) return null;
    found.el.click();
    return found.via;
}};

const dismissPrompts = () => {{
    let clicked = 0;
    for (const selector of QUIZ_SELECTORS) {{
        for (const el of queryAll(selector)) {{
            if (!el.disabled && isVisible(el)) {{
                el.click();
                clicked++;
            }}
        }}
    }}
    return clicked;
}};

const setRate = (id, rate) => {{
    const el = lookup(id);
    if (!el) return null;
    if (el.playbackRate === rate) return false;
    el.playbackRate = rate;
    return true;
}};

const seek = (id, position) => {{
    const el = lookup(id);
    if (!el) return null;
    if (Number.isFinite(el.duration) && position >= el.duration) return false;
    if (el.currentTime >= position) return false;
    el.currentTime = position;
    return true;
}};

const toggle = (id) => {{
    const el = lookup(id);
    if (!el) return null;
    if (el.paused) {{
        const pending = el.play();
        if (pending && typeof pending.catch === 'function') {{
            pending.catch((e) => console.warn('[courseplay] play() rejected:', e));
        }}
        return 'playing';
    }}
    el.pause();
    return 'paused';
}};
"#,
        next = js_list(&selectors.next),
        next_scope = js_string(&selectors.next_text_selector()),
        next_labels = js_list(&selectors.next_labels),
        quiz = js_list(&selectors.quiz),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_lists_keep_order() {
        let selectors = SelectorSet {
            next: vec!["#first".into(), "#second".into()],
            ..SelectorSet::default()
        };
        let script = controls_script(&selectors);
        assert!(script.contains(r##"const NEXT_SELECTORS = ["#first","#second"];"##));
    }

    #[test]
    fn test_labels_are_escaped() {
        let selectors = SelectorSet {
            next_labels: vec!["it's \"next\"".into()],
            ..SelectorSet::default()
        };
        let script = controls_script(&selectors);
        assert!(script.contains(r#"["it's \"next\""]"#));
    }

    #[test]
    fn test_quiz_clicks_only_visible() {
        let script = controls_script(&SelectorSet::default());
        assert!(script.contains("!el.disabled && isVisible(el)"));
    }
}
