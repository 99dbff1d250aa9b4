//! Completion detector.
//!
//! A second opinion on whether the active stage is done, computed from the
//! utterance and the session as the handler saw it. The orchestrator ORs it
//! with the handler's own signal, so either is enough to advance.
//!
//! Turn counts come from the progress markers the handlers keep in the
//! extension state, not from the transcript: live transcriptions and
//! discarded turns are recorded there too but never reached a handler.

use crate::handlers::{MIN_PRIOR_EXCHANGES, OBJECTION_RAISED_KEY, PROBE_EXCHANGES_KEY, QUIZ_ASKED_KEY};
use crate::phrases;
use crate::session::Session;
use crate::stage::Stage;

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    quiz_len: usize,
}

impl CompletionDetector {
    pub fn new(quiz_len: usize) -> Self {
        Self { quiz_len }
    }

    /// Evaluates the current stage of `session` against `user_text`.
    ///
    /// `session` is the pre-turn snapshot; this turn's delta is not merged yet.
    pub fn evaluate(&self, session: &Session, user_text: &str) -> bool {
        let state = &session.extension_state;
        match session.current_stage {
            Stage::Setup => session.profile.is_complete() && phrases::is_affirmative(user_text),
            Stage::PrimaryDataGathering => phrases::is_chemist_closing(user_text),
            Stage::Feedback => true,
            Stage::PersonaProbe => {
                state.get_u64(PROBE_EXCHANGES_KEY).unwrap_or(0) >= MIN_PRIOR_EXCHANGES
                    && phrases::is_doctor_closing(user_text)
            }
            Stage::ObjectionHandling => state.get_bool(OBJECTION_RAISED_KEY).unwrap_or(false),
            Stage::KnowledgeCheck => {
                state.get_u64(QUIZ_ASKED_KEY).unwrap_or(0) as usize >= self.quiz_len
            }
            Stage::End => false,
        }
    }
}
