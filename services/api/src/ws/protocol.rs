//! Defines the WebSocket message protocol between the browser client and the API server.

use monica_core::channel::ChannelEvent;
use monica_core::{Persona, Stage, StageTransition, TurnResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
///
/// Audio travels separately as binary PCM16 frames.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A typed utterance, processed as one turn.
    UserMessage { text: String },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the socket is bound to a session.
    Connected {
        session_id: Uuid,
        stage: Stage,
        persona: Persona,
        /// Whether a live voice provider is attached.
        voice: bool,
    },
    /// The reply to a typed utterance.
    Reply {
        reply: String,
        stage_advanced: bool,
        stage: Stage,
        persona: Persona,
    },
    /// The session moved to a new stage.
    StageUpdate {
        from: Stage,
        to: Stage,
        persona: Persona,
        bridge: Option<String>,
    },
    /// Reports an error to the client.
    Error { message: String },
    /// An update on the user's speech-to-text transcription.
    TranscriptionUpdate { text: String, is_final: bool },
    /// A chunk of audio data (base64 encoded PCM16) for the AI's voice.
    AudioChunk { data: String },
    /// Signals that the AI has started speaking.
    AiSpeakingStart,
    /// Signals that the AI has finished speaking.
    AiSpeakingEnd,
}

impl From<StageTransition> for ServerMessage {
    fn from(t: StageTransition) -> Self {
        ServerMessage::StageUpdate {
            from: t.from,
            to: t.to,
            persona: t.persona,
            bridge: t.bridge,
        }
    }
}

impl From<TurnResult> for ServerMessage {
    fn from(result: TurnResult) -> Self {
        ServerMessage::Reply {
            reply: result.reply,
            stage_advanced: result.stage_advanced,
            stage: result.stage,
            persona: result.persona,
        }
    }
}

impl ServerMessage {
    /// The client-facing form of a channel event; `None` when the channel closed.
    pub fn from_channel(event: ChannelEvent) -> Option<Self> {
        Some(match event {
            ChannelEvent::StageChanged(t) => t.into(),
            ChannelEvent::Audio(data) => ServerMessage::AudioChunk { data },
            ChannelEvent::Transcription { text, is_final } => {
                ServerMessage::TranscriptionUpdate { text, is_final }
            }
            ChannelEvent::Speaking => ServerMessage::AiSpeakingStart,
            ChannelEvent::SpeakingDone => ServerMessage::AiSpeakingEnd,
            ChannelEvent::Error(message) => ServerMessage::Error { message },
            ChannelEvent::Closed => return None,
        })
    }
}
