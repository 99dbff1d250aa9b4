//! Provider-agnostic types for the live (streaming) generation capability.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Name of the structured function a live provider calls to request advancement.
pub const ADVANCE_STAGE_TOOL: &str = "advance_stage";

/// Generic configuration for opening a live session with any provider.
#[derive(Debug, Clone, Default)]
pub struct LiveSessionConfig {
    /// System instruction for the current stage and persona.
    pub instructions: String,
    /// Prebuilt voice name, when the provider supports one.
    pub voice: Option<String>,
    /// Whether to declare the structured `advance_stage` function.
    pub declare_advance_tool: bool,
}

/// Inputs the application sends into an open live session.
#[derive(Debug, Clone)]
pub enum LiveInput {
    /// Raw PCM16 audio captured from the trainee.
    Audio(Vec<u8>),
    /// Context text injected into the conversation (stage changes, bridges).
    Context(String),
    /// Acknowledges a structured function call so the provider can continue.
    ToolResponse { call_id: Option<String>, name: String },
}

/// Events a live provider emits back to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A chunk of spoken audio from the model (base64 encoded PCM16).
    AudioChunk(String),
    /// A transcription of the trainee's speech.
    Transcription { text: String, is_final: bool },
    /// The model started speaking.
    Speaking,
    /// The model finished its turn.
    SpeakingDone,
    /// The structured advance signal. Distinct from any text the model speaks.
    AdvanceStage { call_id: Option<String> },
    /// An error from the provider.
    Error(String),
    /// The provider connection closed.
    Closed,
}

/// Both halves of an open live session.
pub struct LiveChannel {
    pub input: mpsc::Sender<LiveInput>,
    pub events: mpsc::Receiver<LiveEvent>,
}

/// The live generation capability: opens a duplex channel to a streaming model.
#[async_trait]
pub trait LiveGenerator: Send + Sync {
    async fn connect(&self, config: LiveSessionConfig) -> Result<LiveChannel>;
}
