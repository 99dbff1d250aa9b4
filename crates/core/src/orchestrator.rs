//! The stage state machine driver.
//!
//! One [`Orchestrator::submit`] call is one conversational turn. The session's
//! state is read and written under a short per-session lock; the handler
//! (and so the generator call) runs without it, so streaming advancement on
//! the same session is never held up by a slow generation. Turn-mode calls
//! for one session are additionally serialized among themselves.

use crate::bridge::BridgeNarrator;
use crate::detector::CompletionDetector;
use crate::handlers::{Responder, StageOutcome};
use crate::live::LiveSessionConfig;
use crate::llm_client::TextGenerator;
use crate::prompts::StagePrompts;
use crate::registry::{RegistryError, StageRegistry};
use crate::repository::SessionRepository;
use crate::session::{ExtensionState, Message, MessageRole, NewMessage, OPENING_MESSAGE, Session};
use crate::stage::{Persona, Stage};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Longest utterance accepted in one turn, in characters.
pub const MAX_UTTERANCE_CHARS: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Session with id '{0}' not found")]
    NotFound(Uuid),
    #[error("Invalid utterance: {0}")]
    Validation(String),
    #[error(transparent)]
    Configuration(#[from] RegistryError),
    #[error("Storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("Turn task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The caller-facing result of one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    /// The handler's reply, followed by bridge narration if the stage advanced.
    pub reply: String,
    pub stage_advanced: bool,
    /// Stage and persona after the turn.
    pub stage: Stage,
    pub persona: Persona,
    /// What this turn merged into the extension state.
    pub state_delta: ExtensionState,
    /// The step taken when `stage_advanced` is set.
    pub transition: Option<StageTransition>,
}

/// A single forward step of the state machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub persona: Persona,
    pub bridge: Option<String>,
}

#[derive(Default)]
struct SessionLock {
    /// Guards every read-modify-write of session state and transcript.
    state: tokio::sync::Mutex<()>,
    /// Serializes turn-mode steps for one session.
    turn: tokio::sync::Mutex<()>,
}

/// Per-session locks, kept only while some caller holds a lease on them.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<Uuid, Arc<SessionLock>>>,
}

impl SessionLocks {
    fn lease(self: &Arc<Self>, id: Uuid) -> SessionLease {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = map.entry(id).or_default().clone();
        SessionLease {
            locks: self.clone(),
            id,
            lock: Some(lock),
        }
    }

    /// Drops the entry for `id` once no lease refers to it.
    fn release(&self, id: Uuid) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(&id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A handle on one session's locks.
struct SessionLease {
    locks: Arc<SessionLocks>,
    id: Uuid,
    lock: Option<Arc<SessionLock>>,
}

impl Clone for SessionLease {
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
            id: self.id,
            lock: self.lock.clone(),
        }
    }
}

impl std::ops::Deref for SessionLease {
    type Target = SessionLock;

    fn deref(&self) -> &SessionLock {
        // Only taken in `drop`.
        self.lock.as_deref().expect("lease holds its lock until dropped")
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.lock.take();
        self.locks.release(self.id);
    }
}

/// Ties registry, detector, narrator, and repository together.
#[derive(Clone)]
pub struct Orchestrator {
    repo: Arc<dyn SessionRepository>,
    registry: Arc<StageRegistry>,
    detector: CompletionDetector,
    narrator: BridgeNarrator,
    prompts: Arc<StagePrompts>,
    locks: Arc<SessionLocks>,
}

fn validate_utterance(text: &str) -> Result<String, OrchestratorError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(OrchestratorError::Validation(
            "utterance text must not be empty".to_string(),
        ));
    }
    if text.chars().count() > MAX_UTTERANCE_CHARS {
        return Err(OrchestratorError::Validation(format!(
            "utterance exceeds {MAX_UTTERANCE_CHARS} characters"
        )));
    }
    Ok(text.to_string())
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        registry: StageRegistry,
        prompts: Arc<StagePrompts>,
        narrator: BridgeNarrator,
    ) -> Self {
        Self {
            repo,
            registry: Arc::new(registry),
            detector: CompletionDetector::new(prompts.quiz.len()),
            narrator,
            prompts,
            locks: Arc::new(SessionLocks::default()),
        }
    }

    /// The standard coaching flow over `generator`.
    ///
    /// Fails fast if the registry cannot cover every stage.
    pub fn standard(
        repo: Arc<dyn SessionRepository>,
        generator: Arc<dyn TextGenerator>,
        prompts: StagePrompts,
        product: &str,
        generation_timeout: Duration,
    ) -> Result<Self, OrchestratorError> {
        let prompts = Arc::new(prompts);
        let responder = Responder::new(generator, prompts.clone(), generation_timeout);
        let registry = StageRegistry::standard(responder)?;
        Ok(Self::new(repo, registry, prompts, BridgeNarrator::new(product)))
    }

    /// Runs `f` on its own task so that dropping the caller's future cannot
    /// interrupt a half-finished write.
    async fn detached<F, Fut, T>(&self, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(Orchestrator) -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(f(self.clone())).await?
    }

    async fn load(&self, id: Uuid) -> Result<Session, OrchestratorError> {
        self.repo
            .get(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    async fn record(&self, session: &Session, role: MessageRole, content: &str) -> Result<Message, OrchestratorError> {
        let message = NewMessage::for_session(session, role, content);
        Ok(self.repo.append_message(session.id, message).await?)
    }

    /// Creates a session and records its opening coach message.
    #[instrument(skip(self))]
    pub async fn create_session(&self) -> Result<(Session, Message), OrchestratorError> {
        let session = self.repo.create().await?;
        let opening = self.record(&session, MessageRole::Agent, OPENING_MESSAGE).await?;
        info!(session_id = %session.id, "Coaching session created.");
        Ok((session, opening))
    }

    /// The session and its full transcript in sequence order.
    pub async fn session_view(&self, id: Uuid) -> Result<(Session, Vec<Message>), OrchestratorError> {
        let session = self.load(id).await?;
        let transcript = self.repo.list_messages(id).await?;
        Ok((session, transcript))
    }

    /// Processes one trainee utterance.
    #[instrument(skip(self, user_text))]
    pub async fn submit(&self, session_id: Uuid, user_text: &str) -> Result<TurnResult, OrchestratorError> {
        let text = validate_utterance(user_text)?;
        let lock = self.locks.lease(session_id);
        let _turn = lock.turn.lock().await;

        // Read phase: resolve the handler, run pre-processing, take a snapshot.
        let (snapshot, transcript, entry) = {
            let _state = lock.state.lock().await;
            let mut session = self.load(session_id).await?;
            let Some(entry) = self.registry.resolve(session.current_stage).cloned() else {
                drop(_state);
                let lock = lock.clone();
                return self
                    .detached(move |this| async move {
                        let _state = lock.state.lock().await;
                        this.commit_terminal(session_id, text).await
                    })
                    .await;
            };

            let profile_before = session.profile.clone();
            entry.handler.preprocess(&mut session, &text);
            if session.profile != profile_before {
                self.repo.save(&session).await?;
            }
            let transcript = self.repo.list_messages(session_id).await?;
            (session, transcript, entry)
        };

        debug!(stage = %snapshot.current_stage, persona = %entry.persona, "Invoking stage handler.");
        let outcome = entry.handler.handle(&snapshot, &transcript, &text).await;

        let lock = lock.clone();
        self.detached(move |this| async move {
            let _state = lock.state.lock().await;
            this.commit(snapshot, text, outcome).await
        })
        .await
    }

    /// Write phase of a turn. Runs under the state lock.
    async fn commit(
        &self,
        snapshot: Session,
        text: String,
        outcome: StageOutcome,
    ) -> Result<TurnResult, OrchestratorError> {
        let mut session = self.load(snapshot.id).await?;
        self.record(&session, MessageRole::User, &text).await?;
        self.record(&session, MessageRole::Agent, &outcome.reply).await?;

        let mut reply = outcome.reply;
        if session.current_stage != snapshot.current_stage {
            info!(
                from = %snapshot.current_stage,
                now = %session.current_stage,
                "Stage advanced concurrently; this turn's completion is discarded."
            );
            return Ok(TurnResult {
                reply,
                stage_advanced: false,
                stage: session.current_stage,
                persona: session.current_persona(),
                state_delta: ExtensionState::new(),
                transition: None,
            });
        }

        let detected = self.detector.evaluate(&snapshot, &text);
        session.merge_extension_state(outcome.state_delta.clone());
        let complete = outcome.complete || detected;
        debug!(
            stage = %session.current_stage,
            self_reported = outcome.complete,
            detected,
            "Evaluated stage completion."
        );

        let step = if complete { session.advance() } else { None };
        self.repo.save(&session).await?;

        let mut transition = None;
        if let Some((from, to)) = step {
            let bridge = self.record_bridge(from, to, &session).await?;
            if let Some(bridge) = &bridge {
                reply.push_str("\n\n");
                reply.push_str(bridge);
            }
            transition = Some(StageTransition {
                from,
                to,
                persona: session.current_persona(),
                bridge,
            });
        }

        Ok(TurnResult {
            reply,
            stage_advanced: transition.is_some(),
            stage: session.current_stage,
            persona: session.current_persona(),
            state_delta: outcome.state_delta,
            transition,
        })
    }

    /// A turn after the flow has ended: the stage never changes and the
    /// closing summary is returned again.
    async fn commit_terminal(&self, session_id: Uuid, text: String) -> Result<TurnResult, OrchestratorError> {
        let session = self.load(session_id).await?;
        let summary = self.narrator.closing_summary(&session);
        self.record(&session, MessageRole::User, &text).await?;
        self.record(&session, MessageRole::Agent, &summary).await?;
        Ok(TurnResult {
            reply: summary,
            stage_advanced: false,
            stage: session.current_stage,
            persona: session.current_persona(),
            state_delta: ExtensionState::new(),
            transition: None,
        })
    }

    /// Narrates and records the bridge for a transition that was just saved.
    async fn record_bridge(&self, from: Stage, to: Stage, session: &Session) -> Result<Option<String>, OrchestratorError> {
        info!(session_id = %session.id, %from, %to, persona = %session.current_persona(), "Stage advanced.");
        let bridge = self.narrator.narrate(from, to, session);
        if let Some(text) = &bridge {
            self.record(session, MessageRole::Agent, text).await?;
        }
        Ok(bridge)
    }

    /// Advances a session because a live provider sent its structured advance signal.
    ///
    /// Returns `None` when the session is already in the terminal stage.
    #[instrument(skip(self))]
    pub async fn advance_from_signal(&self, session_id: Uuid) -> Result<Option<StageTransition>, OrchestratorError> {
        let lock = self.locks.lease(session_id);
        self.detached(move |this| async move {
            let _state = lock.state.lock().await;
            let mut session = this.load(session_id).await?;
            let Some((from, to)) = session.advance() else {
                debug!("Advance signal received in terminal stage; ignoring.");
                return Ok(None);
            };
            this.repo.save(&session).await?;
            let bridge = this.record_bridge(from, to, &session).await?;
            Ok(Some(StageTransition {
                from,
                to,
                persona: session.current_persona(),
                bridge,
            }))
        })
        .await
    }

    /// Records a finished live utterance under the session's current stage.
    pub async fn record_live_utterance(
        &self,
        session_id: Uuid,
        role: MessageRole,
        text: String,
    ) -> Result<Message, OrchestratorError> {
        let text = validate_utterance(&text)?;
        let lock = self.locks.lease(session_id);
        self.detached(move |this| async move {
            let _state = lock.state.lock().await;
            let session = this.load(session_id).await?;
            this.record(&session, role, &text).await
        })
        .await
    }

    /// Instructions for a live session voicing the session's current stage.
    pub fn live_config(&self, session: &Session, voice: Option<String>) -> LiveSessionConfig {
        LiveSessionConfig {
            instructions: self.stage_instructions(session),
            voice,
            declare_advance_tool: !session.current_stage.is_terminal(),
        }
    }

    /// The system context for a session's current stage, with the known profile.
    pub fn stage_instructions(&self, session: &Session) -> String {
        let p = &session.profile;
        format!(
            "{}\n\nTrainee: {} ({}), HQ {}, {} division.\nWhen the goal of this stage is met, call the `{}` function instead of saying so.",
            self.prompts.system_context(session.current_stage),
            p.name.as_deref().unwrap_or("unknown"),
            p.role.as_deref().unwrap_or("unknown role"),
            p.headquarters.as_deref().unwrap_or("unknown"),
            p.division.as_deref().unwrap_or("unknown"),
            crate::live::ADVANCE_STAGE_TOOL,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::MockTextGenerator;
    use crate::repository::InMemorySessionRepository;

    fn orchestrator(mock: MockTextGenerator) -> Orchestrator {
        Orchestrator::standard(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(mock),
            StagePrompts::default(),
            "Dexel & Dexel ND",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn replying(text: &'static str) -> MockTextGenerator {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate().returning(move |_, _, _| Ok(text.to_string()));
        mock
    }

    #[test]
    fn test_validate_utterance() {
        assert_eq!(validate_utterance("  hi  ").unwrap(), "hi");
        assert!(matches!(validate_utterance("   "), Err(OrchestratorError::Validation(_))));
        let long = "a".repeat(MAX_UTTERANCE_CHARS + 1);
        assert!(matches!(validate_utterance(&long), Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_session_seeds_opening_message() {
        let orch = orchestrator(replying("unused"));
        let (session, opening) = orch.create_session().await.unwrap();
        assert_eq!(session.current_stage, Stage::Setup);
        assert_eq!(opening.content, OPENING_MESSAGE);
        assert_eq!(opening.role, MessageRole::Agent);
        assert_eq!(opening.persona, Persona::Coach);

        let (_, transcript) = orch.session_view(session.id).await.unwrap();
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let orch = orchestrator(replying("unused"));
        let id = Uuid::new_v4();
        assert!(matches!(orch.submit(id, "hello").await, Err(OrchestratorError::NotFound(x)) if x == id));
        assert!(matches!(orch.advance_from_signal(id).await, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.session_view(id).await, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_utterance_mutates_nothing() {
        let orch = orchestrator(replying("unused"));
        let (session, _) = orch.create_session().await.unwrap();
        assert!(matches!(orch.submit(session.id, "  ").await, Err(OrchestratorError::Validation(_))));
        let (_, transcript) = orch.session_view(session.id).await.unwrap();
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_user_message_precedes_reply() {
        let orch = orchestrator(replying("Which division are you in?"));
        let (session, _) = orch.create_session().await.unwrap();
        let result = orch.submit(session.id, "My name is Asha").await.unwrap();
        assert!(!result.stage_advanced);
        assert_eq!(result.reply, "Which division are you in?");

        let (stored, transcript) = orch.session_view(session.id).await.unwrap();
        assert_eq!(stored.profile.name.as_deref(), Some("Asha"));
        let roles: Vec<_> = transcript.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::Agent, MessageRole::User, MessageRole::Agent]);
        assert_eq!(transcript[1].content, "My name is Asha");
    }

    #[tokio::test]
    async fn test_signal_advances_one_step_and_records_bridge() {
        let orch = orchestrator(replying("unused"));
        let (session, _) = orch.create_session().await.unwrap();

        let transition = orch.advance_from_signal(session.id).await.unwrap().unwrap();
        assert_eq!(transition.from, Stage::Setup);
        assert_eq!(transition.to, Stage::PrimaryDataGathering);
        assert_eq!(transition.persona, Persona::Chemist);
        let bridge = transition.bridge.unwrap();

        let (stored, transcript) = orch.session_view(session.id).await.unwrap();
        assert_eq!(stored.current_stage, Stage::PrimaryDataGathering);
        let last = transcript.last().unwrap();
        assert_eq!(last.content, bridge);
        assert_eq!(last.stage, Stage::PrimaryDataGathering);
    }

    #[tokio::test]
    async fn test_signal_in_terminal_stage_is_a_no_op() {
        let orch = orchestrator(replying("unused"));
        let (session, _) = orch.create_session().await.unwrap();
        for _ in 0..6 {
            assert!(orch.advance_from_signal(session.id).await.unwrap().is_some());
        }
        assert!(orch.advance_from_signal(session.id).await.unwrap().is_none());
        let (stored, _) = orch.session_view(session.id).await.unwrap();
        assert_eq!(stored.current_stage, Stage::End);
    }

    #[tokio::test]
    async fn test_lock_entries_are_released_after_use() {
        let orch = orchestrator(replying("Which division are you in?"));
        let (session, _) = orch.create_session().await.unwrap();
        orch.submit(session.id, "My name is Asha").await.unwrap();
        orch.advance_from_signal(session.id).await.unwrap();
        orch.record_live_utterance(session.id, MessageRole::User, "Hello".into())
            .await
            .unwrap();
        assert!(orch.submit(Uuid::new_v4(), "hello").await.is_err());
        assert!(orch.advance_from_signal(Uuid::new_v4()).await.is_err());
        assert_eq!(orch.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_live_utterance_does_not_count_as_objection_turn() {
        let orch = orchestrator(replying("unused"));
        let (session, _) = orch.create_session().await.unwrap();
        while orch.session_view(session.id).await.unwrap().0.current_stage != Stage::ObjectionHandling {
            orch.advance_from_signal(session.id).await.unwrap();
        }
        orch.record_live_utterance(session.id, MessageRole::User, "Hello doctor".into())
            .await
            .unwrap();

        let result = orch.submit(session.id, "Good morning doctor").await.unwrap();
        assert!(!result.stage_advanced);
        assert_eq!(result.stage, Stage::ObjectionHandling);
        assert_eq!(result.reply, StagePrompts::default().objection);
    }

    /// Blocks inside `generate` until released.
    struct GatedGenerator {
        started: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl TextGenerator for GatedGenerator {
        async fn generate(
            &self,
            _system_context: &str,
            _history: &[crate::llm_client::HistoryTurn],
            _user_input: &str,
        ) -> anyhow::Result<String> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("Fair point about patient outcomes.".to_string())
        }
    }

    #[tokio::test]
    async fn test_signal_during_generation_wins_and_turn_completion_is_dropped() {
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let orch = Orchestrator::standard(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(GatedGenerator {
                started: started.clone(),
                release: release.clone(),
            }),
            StagePrompts::default(),
            "Dexel & Dexel ND",
            Duration::from_secs(5),
        )
        .unwrap();
        let (session, _) = orch.create_session().await.unwrap();
        for _ in 0..4 {
            orch.advance_from_signal(session.id).await.unwrap();
        }
        let raised = orch.submit(session.id, "Good morning doctor").await.unwrap();
        assert_eq!(raised.stage, Stage::ObjectionHandling);
        assert!(!raised.stage_advanced);

        // The rebuttal would complete the stage, but a signal lands first.
        let turn = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.submit(session.id, "Our brand has better absorption").await })
        };
        started.notified().await;
        let transition = orch.advance_from_signal(session.id).await.unwrap().unwrap();
        assert_eq!(transition.to, Stage::KnowledgeCheck);
        release.notify_one();

        let result = turn.await.unwrap().unwrap();
        assert!(!result.stage_advanced);
        assert_eq!(result.stage, Stage::KnowledgeCheck);
        assert!(result.state_delta.is_empty());

        let (stored, transcript) = orch.session_view(session.id).await.unwrap();
        assert_eq!(stored.current_stage, Stage::KnowledgeCheck);
        let last = transcript.last().unwrap();
        assert_eq!(last.content, "Fair point about patient outcomes.");
        assert_eq!(last.stage, Stage::KnowledgeCheck);
    }

    #[test]
    fn test_stage_instructions_mention_structured_signal() {
        let orch = orchestrator(replying("unused"));
        let session = Session::new(Uuid::new_v4());
        let config = orch.live_config(&session, Some("Puck".into()));
        assert!(config.instructions.contains("CURRENT STAGE: SETUP"));
        assert!(config.instructions.contains("advance_stage"));
        assert!(config.declare_advance_tool);
        assert_eq!(config.voice.as_deref(), Some("Puck"));
    }
}
