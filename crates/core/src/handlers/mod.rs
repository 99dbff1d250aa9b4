//! Stage handlers.
//!
//! Each stage's conversational behavior is one implementation of
//! [`StageHandler`]. Handlers are shared across sessions and hold no
//! per-session state: anything they need to remember between turns is read
//! from the session's extension state and written back through
//! [`StageOutcome::state_delta`].

mod data_gathering;
mod feedback;
mod knowledge_check;
mod objection;
mod persona_probe;
mod setup;

pub use data_gathering::DataGatheringHandler;
pub use feedback::{FeedbackHandler, ProbeItem};
pub use knowledge_check::KnowledgeCheckHandler;
pub use objection::ObjectionHandler;
pub use persona_probe::PersonaProbeHandler;
pub use setup::{SetupHandler, extract_profile};

pub(crate) use knowledge_check::ASKED_KEY as QUIZ_ASKED_KEY;
pub(crate) use objection::RAISED_KEY as OBJECTION_RAISED_KEY;
pub(crate) use persona_probe::{EXCHANGES_KEY as PROBE_EXCHANGES_KEY, MIN_PRIOR_EXCHANGES};

use crate::live::ADVANCE_STAGE_TOOL;
use crate::llm_client::{HistoryTurn, TextGenerator};
use crate::prompts::StagePrompts;
use crate::session::{ExtensionState, Message, Session, messages_in_stage};
use crate::stage::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// What a handler produced for one inbound utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub reply: String,
    /// The handler's own judgement that the stage goal is met.
    pub complete: bool,
    /// Progress markers to merge into the session's extension state.
    pub state_delta: ExtensionState,
}

impl StageOutcome {
    pub fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            complete: false,
            state_delta: ExtensionState::new(),
        }
    }

    pub fn completed(reply: impl Into<String>) -> Self {
        Self {
            complete: true,
            ..Self::reply(reply)
        }
    }

    pub fn with_state(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.state_delta.insert(key, value);
        self
    }
}

/// The single capability every stage behavior implements.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage-specific mutation applied to the session before `handle` runs.
    ///
    /// Runs under the session lock, so it must not block.
    fn preprocess(&self, _session: &mut Session, _user_text: &str) {}

    /// Produces a reply and a completion signal. Never fails: generation
    /// problems are replaced by the handler's fallback text.
    async fn handle(&self, session: &Session, transcript: &[Message], user_text: &str)
    -> StageOutcome;
}

/// Wraps the text generator with the shared failure policy: a bounded wait,
/// no retries, and a fixed non-empty fallback for failed or empty output.
#[derive(Clone)]
pub struct Responder {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<StagePrompts>,
    timeout: Duration,
}

impl Responder {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Arc<StagePrompts>, timeout: Duration) -> Self {
        Self {
            generator,
            prompts,
            timeout,
        }
    }

    pub fn prompts(&self) -> &StagePrompts {
        &self.prompts
    }

    /// Generates a reply in the voice of `stage`, with `extra_context` appended
    /// to the system context. Returns `fallback` on error, timeout, or empty output.
    pub async fn reply_or(
        &self,
        stage: Stage,
        extra_context: Option<&str>,
        transcript: &[Message],
        user_text: &str,
        fallback: &str,
    ) -> String {
        let mut system = self.prompts.system_context(stage);
        if let Some(extra) = extra_context {
            system.push_str("\n\n");
            system.push_str(extra);
        }
        let history: Vec<HistoryTurn> = messages_in_stage(transcript, stage)
            .map(HistoryTurn::from)
            .collect();

        let generated = tokio::time::timeout(
            self.timeout,
            self.generator.generate(&system, &history, user_text),
        )
        .await;

        match generated {
            Ok(Ok(text)) => {
                let cleaned = strip_control_marker(&text);
                if cleaned.is_empty() {
                    warn!(%stage, "Generator returned empty output, using fallback reply.");
                    fallback.to_string()
                } else {
                    cleaned
                }
            }
            Ok(Err(e)) => {
                warn!(%stage, error = ?e, "Generator failed, using fallback reply.");
                fallback.to_string()
            }
            Err(_) => {
                warn!(%stage, timeout_ms = self.timeout.as_millis() as u64, "Generator timed out, using fallback reply.");
                fallback.to_string()
            }
        }
    }
}

/// Removes a literal advance marker a model may emit in its prose.
///
/// The marker is never treated as a completion signal in turn mode.
pub fn strip_control_marker(text: &str) -> String {
    text.replace(&format!("`{ADVANCE_STAGE_TOOL}`"), "")
        .replace(ADVANCE_STAGE_TOOL, "")
        .trim()
        .to_string()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_strip_control_marker() {
        assert_eq!(strip_control_marker("Great job. `advance_stage`"), "Great job.");
        assert_eq!(strip_control_marker("advance_stage"), "");
        assert_eq!(strip_control_marker("  plain reply "), "plain reply");
    }

    #[tokio::test]
    async fn test_reply_or_passes_generated_text() {
        let responder = responder_with(replying("Dr. Rao prescribes the 60k sachet."));
        let reply = responder
            .reply_or(Stage::PrimaryDataGathering, None, &[], "What does he prescribe?", "fallback")
            .await;
        assert_eq!(reply, "Dr. Rao prescribes the 60k sachet.");
    }

    #[tokio::test]
    async fn test_reply_or_falls_back_on_error_and_empty_output() {
        let responder = responder_with(failing());
        let reply = responder.reply_or(Stage::Setup, None, &[], "hi", "fallback").await;
        assert_eq!(reply, "fallback");

        let responder = responder_with(replying("   `advance_stage`  "));
        let reply = responder.reply_or(Stage::Setup, None, &[], "hi", "fallback").await;
        assert_eq!(reply, "fallback");
    }

    #[tokio::test]
    async fn test_reply_or_falls_back_on_timeout() {
        struct Stalled;
        #[async_trait]
        impl TextGenerator for Stalled {
            async fn generate(&self, _: &str, _: &[HistoryTurn], _: &str) -> anyhow::Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("too late".into())
            }
        }
        let responder = Responder::new(
            Arc::new(Stalled),
            Arc::new(StagePrompts::default()),
            Duration::from_millis(10),
        );
        let reply = responder.reply_or(Stage::Setup, None, &[], "hi", "fallback").await;
        assert_eq!(reply, "fallback");
    }

    #[tokio::test]
    async fn test_reply_or_sends_only_current_stage_history() {
        use crate::session::{MessageRole, NewMessage};
        use crate::repository::{InMemorySessionRepository, SessionRepository};

        let repo = InMemorySessionRepository::new();
        let mut session = repo.create().await.unwrap();
        repo.append_message(session.id, NewMessage::for_session(&session, MessageRole::User, "setup talk"))
            .await
            .unwrap();
        session.advance();
        repo.append_message(session.id, NewMessage::for_session(&session, MessageRole::User, "chemist talk"))
            .await
            .unwrap();
        let transcript = repo.list_messages(session.id).await.unwrap();

        let mut mock = crate::llm_client::MockTextGenerator::new();
        mock.expect_generate()
            .withf(|system, history, input| {
                system.contains("CHEMIST")
                    && history.len() == 1
                    && history[0].content == "chemist talk"
                    && input == "next"
            })
            .returning(|_, _, _| Ok("ok".into()));
        let responder = responder_with(mock);
        let reply = responder
            .reply_or(Stage::PrimaryDataGathering, None, &transcript, "next", "fallback")
            .await;
        assert_eq!(reply, "ok");
    }
}
