//! API Models
//!
//! Request and response bodies of the REST API, documented for OpenAPI with
//! `utoipa`. Core types are converted at this boundary so the wire format
//! stays independent of the orchestration crate.

use chrono::{DateTime, Utc};
use monica_core::session::{Message, MessageRole, Session, TraineeProfile};
use monica_core::{Persona, Stage, TurnResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct CreateSessionResponse {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(value_type = String, example = "SETUP")]
    pub stage: Stage,
    #[schema(value_type = String, example = "COACH")]
    pub persona: Persona,
    pub opening_message: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitMessagePayload {
    #[schema(example = "My name is Asha, I'm a BM, HQ Delhi, division Stimulus")]
    pub text: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct TurnResponse {
    pub reply: String,
    pub stage_advanced: bool,
    #[schema(value_type = String, example = "PRIMARY_DATA_GATHERING")]
    pub stage: Stage,
    #[schema(value_type = String, example = "CHEMIST")]
    pub persona: Persona,
    #[schema(value_type = Object)]
    pub state_delta: Value,
}

impl From<TurnResult> for TurnResponse {
    fn from(result: TurnResult) -> Self {
        Self {
            reply: result.reply,
            stage_advanced: result.stage_advanced,
            stage: result.stage,
            persona: result.persona,
            state_delta: Value::Object(result.state_delta.0),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Default)]
pub struct ProfileView {
    pub name: Option<String>,
    #[schema(example = "BM")]
    pub role: Option<String>,
    pub headquarters: Option<String>,
    pub division: Option<String>,
}

impl From<TraineeProfile> for ProfileView {
    fn from(p: TraineeProfile) -> Self {
        Self {
            name: p.name,
            role: p.role,
            headquarters: p.headquarters,
            division: p.division,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct TranscriptEntry {
    pub id: i64,
    #[schema(value_type = String, example = "user")]
    pub role: MessageRole,
    pub content: String,
    #[schema(value_type = String, example = "SETUP")]
    pub stage: Stage,
    #[schema(value_type = String, example = "COACH")]
    pub persona: Persona,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for TranscriptEntry {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            role: m.role,
            content: m.content,
            stage: m.stage,
            persona: m.persona,
            created_at: m.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionDetail {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub profile: ProfileView,
    #[schema(value_type = String, example = "FEEDBACK")]
    pub stage: Stage,
    #[schema(value_type = String, example = "COACH")]
    pub persona: Persona,
    #[schema(value_type = Object)]
    pub extension_state: Value,
    pub transcript: Vec<TranscriptEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionDetail {
    pub fn new(session: Session, transcript: Vec<Message>) -> Self {
        let persona = session.current_persona();
        Self {
            session_id: session.id,
            profile: session.profile.into(),
            stage: session.current_stage,
            persona,
            extension_state: Value::Object(session.extension_state.0),
            transcript: transcript.into_iter().map(TranscriptEntry::from).collect(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
