//! Selector configuration
//!
//! The host page gives no stable contract for any of this. Lists are tried
//! in order and can be swapped wholesale through `AgentConfig`.

use serde::{Deserialize, Serialize};

/// Ordered selector lists used by the page-side scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSet {
    /// Playable media elements
    pub media: Vec<String>,
    /// Structural "next item" controls, most specific first
    pub next: Vec<String>,
    /// Elements whose text is compared against `next_labels` when no
    /// structural match exists
    pub next_text_scope: Vec<String>,
    /// Lower-case labels of a "next" control
    pub next_labels: Vec<String>,
    /// In-video quiz / continue prompts, clicked when visible
    pub quiz: Vec<String>,
    /// Elements that swallow keyboard shortcuts while focused
    pub text_input: Vec<String>,
}

impl Default for SelectorSet {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            media: owned(&["video"]),
            next: owned(&[
                "[data-testid=\"next-item\"]",
                "button[aria-label=\"Next Item\"]",
                "a[aria-label=\"Next Item\"]",
                ".rc-NextItem button",
                ".next-item-button",
                "[data-track-component=\"next_item\"]",
            ]),
            next_text_scope: owned(&["button", "a", "[role=\"button\"]"]),
            next_labels: owned(&[
                "go to next item",
                "next item",
                "next",
                "continue",
                "siguiente",
                "continuar",
                "suivant",
                "continuer",
                "weiter",
                "próximo",
                "avançar",
                "avanti",
                "далее",
                "下一个",
                "次へ",
                "다음",
            ]),
            quiz: owned(&[
                "[data-testid=\"in-video-quiz-continue\"]",
                "[data-testid=\"ivq-skip-button\"]",
                ".rc-VideoQuizModal button[data-track-component=\"continue\"]",
                ".rc-InVideoQuiz button.continue-button",
                "button[aria-label=\"Continue\"]",
                "button[aria-label=\"Skip\"]",
            ]),
            text_input: owned(&[
                "input",
                "textarea",
                "select",
                "[contenteditable=\"\"]",
                "[contenteditable=\"true\"]",
                "[role=\"textbox\"]",
            ]),
        }
    }
}

impl SelectorSet {
    /// Comma-joined media selector for `matches`/`querySelectorAll`
    pub fn media_selector(&self) -> String {
        self.media.join(", ")
    }

    /// Comma-joined selector of text-input-capable elements
    pub fn text_input_selector(&self) -> String {
        self.text_input.join(", ")
    }

    /// Comma-joined scope for the text fallback
    pub fn next_text_selector(&self) -> String {
        self.next_text_scope.join(", ")
    }
}
