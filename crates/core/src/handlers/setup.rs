use super::{Responder, StageHandler, StageOutcome};
use crate::phrases;
use crate::session::{Message, Session, TraineeProfile};
use crate::stage::Stage;
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::info;

const CONFIRMED_REPLY: &str = "Perfect. Your session is now set up. Let's begin.";

// A value is one word, optionally followed by one more capitalized word.
static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\bmy name is|\bname is|\bname\s*[:\-]|\bthis is|\bi am|\bi'm|\bcall me)\s+([A-Za-z][A-Za-z'\-]*(?:\s+[A-Z][A-Za-z'\-]*)?)",
    )
    .expect("valid name pattern")
});

static ROLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bm|business manager|pl|product leader|product lead)\b")
        .expect("valid role pattern")
});

static HEADQUARTERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\bhq|\bheadquarters|\bheadquartered|\bheadquarter|\bhead office|\bbased (?:in|at|out of))\b(?i:\s*(?:is\b|in\b|at\b|:|-|=))?\s*([A-Za-z][A-Za-z'\-]*(?:\s+[A-Z][A-Za-z'\-]*)?)",
    )
    .expect("valid headquarters pattern")
});

static DIVISION_AFTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\bdivision|\bdiv)\b(?i:\s*(?:is\b|:|-|=))?\s*([A-Za-z][A-Za-z'\-]*(?:\s+[A-Z][A-Za-z'\-]*)?)",
    )
    .expect("valid division pattern")
});

static DIVISION_BEFORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z'\-]*)\s+(?i:division)\b").expect("valid division pattern")
});

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "from", "in", "at", "based", "working", "with", "and", "my", "our", "is",
    "i", "i'm", "bm", "pl", "business", "product", "manager", "leader", "hq", "division", "here",
    "also", "currently", "not", "sure", "yes", "no", "ok", "okay", "fine", "good", "ready", "head",
    "office", "role", "name", "this", "that", "of",
];

/// Keeps the leading words of a captured value up to the first stopword.
fn clean_value(raw: &str) -> Option<String> {
    let kept: Vec<&str> = raw
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .take_while(|w| !w.is_empty() && !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}

fn first_value(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .filter_map(|c: Captures<'_>| c.get(1).and_then(|m| clean_value(m.as_str())))
        .next()
}

/// Best-effort, order-independent extraction of profile fields from free text.
///
/// Fields that cannot be found are left `None`.
pub fn extract_profile(text: &str) -> TraineeProfile {
    let text = text.replace(['\u{2019}', '\u{2018}'], "'");

    let role = ROLE.captures(&text).and_then(|c| c.get(1)).map(|m| {
        match m.as_str().to_lowercase().as_str() {
            "bm" | "business manager" => "BM".to_string(),
            _ => "PL".to_string(),
        }
    });

    TraineeProfile {
        name: first_value(&NAME, &text),
        role,
        headquarters: first_value(&HEADQUARTERS, &text),
        division: first_value(&DIVISION_AFTER, &text).or_else(|| first_value(&DIVISION_BEFORE, &text)),
    }
}

/// Collects the trainee's profile and waits for an explicit confirmation.
pub struct SetupHandler {
    responder: Responder,
}

impl SetupHandler {
    pub fn new(responder: Responder) -> Self {
        Self { responder }
    }

    fn summary(profile: &TraineeProfile) -> String {
        format!(
            "Here is what I have: Name: {}, Role: {}, HQ: {}, Division: {}. Is that correct?",
            profile.name.as_deref().unwrap_or_default(),
            profile.role.as_deref().unwrap_or_default(),
            profile.headquarters.as_deref().unwrap_or_default(),
            profile.division.as_deref().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl StageHandler for SetupHandler {
    fn preprocess(&self, session: &mut Session, user_text: &str) {
        let filled = session.profile.fill_missing(extract_profile(user_text));
        if !filled.is_empty() {
            info!(session_id = %session.id, fields = ?filled, "Profile fields captured.");
        }
    }

    async fn handle(&self, session: &Session, transcript: &[Message], user_text: &str) -> StageOutcome {
        let profile = &session.profile;
        if profile.is_complete() {
            if phrases::is_affirmative(user_text) {
                return StageOutcome::completed(CONFIRMED_REPLY);
            }
            return StageOutcome::reply(Self::summary(profile));
        }

        let missing = profile.missing_fields().join(", ");
        let known = format!(
            "Known so far:\n- Name: {}\n- Role: {}\n- HQ: {}\n- Division: {}\nStill missing: {}",
            profile.name.as_deref().unwrap_or("unknown"),
            profile.role.as_deref().unwrap_or("unknown"),
            profile.headquarters.as_deref().unwrap_or("unknown"),
            profile.division.as_deref().unwrap_or("unknown"),
            missing,
        );
        let fallback = format!("Could you please share your {missing}?");
        let reply = self
            .responder
            .reply_or(Stage::Setup, Some(&known), transcript, user_text, &fallback)
            .await;
        StageOutcome::reply(reply)
    }
}
