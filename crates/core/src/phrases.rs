//! Word and phrase matchers shared by the stage handlers and the completion detector.

use regex::Regex;
use std::sync::LazyLock;

static AFFIRMATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:yes|yeah|yep|yup|correct|confirm|confirmed|that's right|right|sure|absolutely)\b")
        .expect("valid affirmative pattern")
});

static NEGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:no|not|nope|wrong|incorrect)\b").expect("valid negation pattern")
});

static CHEMIST_CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:thank you|thanks|that's it|that's all|done|no more|all i needed)\b")
        .expect("valid closing pattern")
});

static DOCTOR_CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:thank you doctor|thanks doctor|thank you for your time|that covers|i believe i've addressed|that's all|i think i've covered)\b",
    )
    .expect("valid doctor closing pattern")
});

/// Lowercases and folds typographic apostrophes so patterns can stay ASCII.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}', '`'], "'")
}

/// The utterance confirms something and does not also negate it.
pub fn is_affirmative(text: &str) -> bool {
    let t = normalize(text);
    AFFIRMATIVE.is_match(&t) && !NEGATION.is_match(&t)
}

/// Gratitude or termination phrasing that ends a chemist call.
pub fn is_chemist_closing(text: &str) -> bool {
    CHEMIST_CLOSING.is_match(&normalize(text))
}

/// Phrasing a trainee uses to wrap up a doctor conversation.
pub fn is_doctor_closing(text: &str) -> bool {
    DOCTOR_CLOSING.is_match(&normalize(text))
}
