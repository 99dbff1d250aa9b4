//! Streaming-mode glue between a live provider and the orchestrator.
//!
//! The transport (a WebSocket in the API service) forwards provider events
//! through [`LiveSessionDriver::on_event`] and relays whatever
//! [`ChannelEvent`] comes back to its client.

use crate::live::{ADVANCE_STAGE_TOOL, LiveEvent, LiveGenerator, LiveInput};
use crate::orchestrator::{Orchestrator, OrchestratorError, StageTransition};
use crate::session::MessageRole;
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the transport should tell its client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StageChanged(StageTransition),
    Audio(String),
    Transcription { text: String, is_final: bool },
    Speaking,
    SpeakingDone,
    Error(String),
    Closed,
}

/// Drives one session's live conversation.
pub struct LiveSessionDriver {
    orchestrator: Orchestrator,
    session_id: Uuid,
    input: mpsc::Sender<LiveInput>,
}

impl LiveSessionDriver {
    pub fn new(orchestrator: Orchestrator, session_id: Uuid, input: mpsc::Sender<LiveInput>) -> Self {
        Self {
            orchestrator,
            session_id,
            input,
        }
    }

    /// Opens a live channel configured for the session's current stage.
    ///
    /// Returns the driver and the provider's event stream.
    pub async fn open(
        orchestrator: Orchestrator,
        live: &dyn LiveGenerator,
        session_id: Uuid,
        voice: Option<String>,
    ) -> Result<(Self, mpsc::Receiver<LiveEvent>), OrchestratorError> {
        let (session, _) = orchestrator.session_view(session_id).await?;
        let config = orchestrator.live_config(&session, voice);
        let channel = live
            .connect(config)
            .await
            .context("Failed to open live provider session")?;
        info!(%session_id, stage = %session.current_stage, "Live provider session opened.");
        Ok((Self::new(orchestrator, session_id, channel.input), channel.events))
    }

    /// Forwards trainee audio to the provider.
    pub async fn send_audio(&self, pcm: Vec<u8>) -> Result<()> {
        self.input
            .send(LiveInput::Audio(pcm))
            .await
            .context("Live provider input closed")
    }

    /// Injects context text into the live conversation.
    pub async fn inject(&self, text: String) {
        if self.input.send(LiveInput::Context(text)).await.is_err() {
            warn!(session_id = %self.session_id, "Live provider input closed; context not injected.");
        }
    }

    /// Handles one provider event, applying its side effects.
    pub async fn on_event(&self, event: LiveEvent) -> Result<Option<ChannelEvent>, OrchestratorError> {
        let forwarded = match event {
            LiveEvent::AdvanceStage { call_id } => {
                let transition = self.orchestrator.advance_from_signal(self.session_id).await?;
                let response = LiveInput::ToolResponse {
                    call_id,
                    name: ADVANCE_STAGE_TOOL.to_string(),
                };
                if self.input.send(response).await.is_err() {
                    warn!(session_id = %self.session_id, "Live provider input closed before tool response.");
                }
                match transition {
                    Some(transition) => {
                        self.inject_stage_context(&transition).await?;
                        Some(ChannelEvent::StageChanged(transition))
                    }
                    None => None,
                }
            }
            LiveEvent::Transcription { text, is_final } => {
                if is_final && !text.trim().is_empty() {
                    self.orchestrator
                        .record_live_utterance(self.session_id, MessageRole::User, text.clone())
                        .await?;
                }
                Some(ChannelEvent::Transcription { text, is_final })
            }
            LiveEvent::AudioChunk(data) => Some(ChannelEvent::Audio(data)),
            LiveEvent::Speaking => Some(ChannelEvent::Speaking),
            LiveEvent::SpeakingDone => Some(ChannelEvent::SpeakingDone),
            LiveEvent::Error(message) => Some(ChannelEvent::Error(message)),
            LiveEvent::Closed => Some(ChannelEvent::Closed),
        };
        Ok(forwarded)
    }

    /// Gives the live model the new stage's instructions and the bridge to speak.
    ///
    /// Used for signalled advances and for stage changes made by typed turns.
    pub async fn inject_stage_context(&self, transition: &StageTransition) -> Result<(), OrchestratorError> {
        let (session, _) = self.orchestrator.session_view(self.session_id).await?;
        let mut context = self.orchestrator.stage_instructions(&session);
        if let Some(bridge) = &transition.bridge {
            context.push_str("\n\nSay this to the trainee now:\n");
            context.push_str(bridge);
        }
        debug!(session_id = %self.session_id, to = %transition.to, "Injecting new stage context.");
        self.inject(context).await;
        Ok(())
    }
}
