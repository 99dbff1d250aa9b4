use super::{Responder, StageHandler, StageOutcome};
use crate::phrases;
use crate::session::{Message, MessageRole, Session, messages_in_stage};
use crate::stage::Stage;
use async_trait::async_trait;
use tracing::warn;

pub(crate) const EXCHANGES_KEY: &str = "persona_probe.exchanges";
pub(crate) const MIN_PRIOR_EXCHANGES: u64 = 1;

const LISTENING_FALLBACK: &str = "Go on, I'm listening. What else would you like to know about my patients?";
const CLOSING_FALLBACK: &str =
    "Thank you. Overall you did well; next time back your claims with specific patient outcomes.";

/// The doctor being probed and pitched to.
///
/// Listens and answers until the trainee has had at least one full exchange
/// and then wraps up with a closing phrase.
pub struct PersonaProbeHandler {
    responder: Responder,
}

impl PersonaProbeHandler {
    pub fn new(responder: Responder) -> Self {
        Self { responder }
    }
}

/// Whether `reply` repeats something the agent already said in this stage.
fn repeats_earlier_reply(transcript: &[Message], reply: &str) -> bool {
    let reply = phrases::normalize(reply.trim());
    messages_in_stage(transcript, Stage::PersonaProbe)
        .filter(|m| m.role == MessageRole::Agent)
        .any(|m| phrases::normalize(m.content.trim()) == reply)
}

#[async_trait]
impl StageHandler for PersonaProbeHandler {
    async fn handle(&self, session: &Session, transcript: &[Message], user_text: &str) -> StageOutcome {
        let prior = session.extension_state.get_u64(EXCHANGES_KEY).unwrap_or(0);
        let wrapping_up = prior >= MIN_PRIOR_EXCHANGES && phrases::is_doctor_closing(user_text);

        let (extra, fallback) = if wrapping_up {
            (
                "The representative is wrapping up. Give brief feedback on the pitch in two lines and close.",
                CLOSING_FALLBACK,
            )
        } else {
            (
                "Continue from where the conversation is. Answer the question asked.",
                LISTENING_FALLBACK,
            )
        };

        let mut reply = self
            .responder
            .reply_or(Stage::PersonaProbe, Some(extra), transcript, user_text, fallback)
            .await;
        if repeats_earlier_reply(transcript, &reply) {
            warn!(session_id = %session.id, "Doctor reply repeated earlier content, using fallback.");
            reply = fallback.to_string();
        }

        let outcome = if wrapping_up {
            StageOutcome::completed(reply)
        } else {
            StageOutcome::reply(reply)
        };
        outcome.with_state(EXCHANGES_KEY, prior + 1)
    }
}
