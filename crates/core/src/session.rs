//! Session & transcript model.
//!
//! A [`Session`] is one coaching engagement: the trainee's profile, the
//! stage the flow is in, and an open-ended scratchpad. The transcript is a
//! separate, append-only log of [`Message`]s, each tagged with the stage and
//! persona that were active when it was recorded.

use crate::stage::{Persona, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// The opening coach line recorded into every new session.
pub const OPENING_MESSAGE: &str = "Welcome to the pitching module. Please tell me your name, your role (BM or PL), your headquarter base, and your division.";

/// Trainee details collected during the setup stage.
///
/// Every field starts unset and, once set, is never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraineeProfile {
    pub name: Option<String>,
    pub role: Option<String>,
    pub headquarters: Option<String>,
    pub division: Option<String>,
}

impl TraineeProfile {
    /// Copies each field of `extracted` into this profile only where this
    /// profile has no value yet. Returns the names of the fields that were filled.
    pub fn fill_missing(&mut self, extracted: TraineeProfile) -> Vec<&'static str> {
        let mut filled = Vec::new();
        for (name, slot, value) in [
            ("name", &mut self.name, extracted.name),
            ("role", &mut self.role, extracted.role),
            ("headquarters", &mut self.headquarters, extracted.headquarters),
            ("division", &mut self.division, extracted.division),
        ] {
            let value = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
            if slot.is_none() {
                if let Some(value) = value {
                    *slot = Some(value);
                    filled.push(name);
                }
            }
        }
        filled
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Human-readable labels of the fields still unset, in prompt order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.is_none() {
            missing.push("name");
        }
        if self.role.is_none() {
            missing.push("role (BM or PL)");
        }
        if self.headquarters.is_none() {
            missing.push("headquarter");
        }
        if self.division.is_none() {
            missing.push("division");
        }
        missing
    }
}

/// Open-ended per-session scratchpad accumulated across stages.
///
/// Updates are merged key by key; the latest write to a key wins and keys
/// absent from an update are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionState(pub Map<String, Value>);

impl ExtensionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Shallow key-wise union with `partial`.
    pub fn merge(&mut self, partial: ExtensionState) {
        for (key, value) in partial.0 {
            self.0.insert(key, value);
        }
    }
}

/// One coaching engagement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub profile: TraineeProfile,
    pub current_stage: Stage,
    pub extension_state: ExtensionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A fresh session in the first stage with an empty profile.
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            profile: TraineeProfile::default(),
            current_stage: Stage::FIRST,
            extension_state: ExtensionState::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The persona for the current stage. Always derived, never stored.
    pub fn current_persona(&self) -> Persona {
        self.current_stage.persona()
    }

    pub fn merge_extension_state(&mut self, partial: ExtensionState) {
        self.extension_state.merge(partial);
    }

    /// Moves the session one stage forward.
    ///
    /// Returns the `(from, to)` pair, or `None` when the session is already
    /// in the terminal stage.
    pub fn advance(&mut self) -> Option<(Stage, Stage)> {
        let from = self.current_stage;
        let to = from.next()?;
        self.current_stage = to;
        self.updated_at = Utc::now();
        Some((from, to))
    }
}

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Agent => "agent",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = crate::stage::ParseIdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "agent" => Ok(MessageRole::Agent),
            _ => Err(crate::stage::ParseIdentError {
                kind: "message role",
                value: s.to_string(),
            }),
        }
    }
}

/// A message about to be appended; the repository assigns its sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub stage: Stage,
    pub persona: Persona,
}

impl NewMessage {
    /// A message tagged with the session's stage and persona at this moment.
    pub fn for_session(session: &Session, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            stage: session.current_stage,
            persona: session.current_persona(),
        }
    }
}

/// One recorded transcript entry. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Monotonic sequence number assigned at append time.
    pub id: i64,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub stage: Stage,
    pub persona: Persona,
    pub created_at: DateTime<Utc>,
}

/// Messages of `transcript` recorded while `stage` was active, in order.
pub fn messages_in_stage(transcript: &[Message], stage: Stage) -> impl Iterator<Item = &Message> {
    transcript.iter().filter(move |m| m.stage == stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(name: &str) -> TraineeProfile {
        TraineeProfile {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_session_starts_in_setup_with_empty_profile() {
        let session = Session::new(Uuid::new_v4());
        assert_eq!(session.current_stage, Stage::Setup);
        assert_eq!(session.current_persona(), Persona::Coach);
        assert_eq!(session.profile, TraineeProfile::default());
        assert!(session.extension_state.is_empty());
    }

    #[test]
    fn test_fill_missing_never_overwrites() {
        let mut p = profile("Asha");
        let filled = p.fill_missing(TraineeProfile {
            name: Some("Ravi".into()),
            division: Some("Stimulus".into()),
            ..Default::default()
        });
        assert_eq!(filled, vec!["division"]);
        assert_eq!(p.name.as_deref(), Some("Asha"));
        assert_eq!(p.division.as_deref(), Some("Stimulus"));
    }

    #[test]
    fn test_fill_missing_ignores_blank_values() {
        let mut p = TraineeProfile::default();
        let filled = p.fill_missing(TraineeProfile {
            role: Some("   ".into()),
            ..Default::default()
        });
        assert!(filled.is_empty());
        assert!(p.role.is_none());
    }

    #[test]
    fn test_missing_fields_in_prompt_order() {
        let p = profile("Asha");
        assert_eq!(
            p.missing_fields(),
            vec!["role (BM or PL)", "headquarter", "division"]
        );
        assert!(!p.is_complete());
    }

    #[test]
    fn test_merge_is_shallow_union_latest_wins() {
        let mut state = ExtensionState::new();
        state.insert("a", 1);
        state.insert("b", json!({"x": 1}));

        let mut partial = ExtensionState::new();
        partial.insert("b", json!({"y": 2}));
        partial.insert("c", true);
        state.merge(partial);

        assert_eq!(state.get_u64("a"), Some(1));
        assert_eq!(state.get("b"), Some(&json!({"y": 2})));
        assert_eq!(state.get_bool("c"), Some(true));
    }

    #[test]
    fn test_advance_stops_at_end() {
        let mut session = Session::new(Uuid::new_v4());
        let mut walked = vec![session.current_stage];
        while let Some((from, to)) = session.advance() {
            assert_eq!(from.next(), Some(to));
            walked.push(to);
        }
        assert_eq!(walked, Stage::ALL.to_vec());
        assert_eq!(session.advance(), None);
        assert_eq!(session.current_stage, Stage::End);
    }

    #[test]
    fn test_new_message_tags_current_stage_and_persona() {
        let mut session = Session::new(Uuid::new_v4());
        session.advance();
        let msg = NewMessage::for_session(&session, MessageRole::Agent, "hello");
        assert_eq!(msg.stage, Stage::PrimaryDataGathering);
        assert_eq!(msg.persona, Persona::Chemist);
    }

    #[test]
    fn test_message_role_parses_only_stored_names() {
        assert_eq!("agent".parse::<MessageRole>(), Ok(MessageRole::Agent));
        assert_eq!("USER".parse::<MessageRole>(), Ok(MessageRole::User));
        assert!("assistant".parse::<MessageRole>().is_err());
        assert!("system".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_extension_state_serializes_as_plain_object() {
        let mut state = ExtensionState::new();
        state.insert("objection.raised", true);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"objection.raised":true}"#);
    }
}
