use super::{Responder, StageHandler, StageOutcome};
use crate::session::{Message, Session};
use crate::stage::Stage;
use async_trait::async_trait;

pub(crate) const RAISED_KEY: &str = "objection.raised";
const REBUTTAL_KEY: &str = "objection.rebuttal";
const EVALUATION_FALLBACK: &str =
    "You handled the objection well, but you could be more specific about patient outcomes.";

/// Raises one fixed objection, then evaluates the rebuttal.
///
/// The evaluation is advisory: the second turn completes the stage whatever
/// the trainee said.
pub struct ObjectionHandler {
    responder: Responder,
}

impl ObjectionHandler {
    pub fn new(responder: Responder) -> Self {
        Self { responder }
    }
}

#[async_trait]
impl StageHandler for ObjectionHandler {
    async fn handle(&self, session: &Session, transcript: &[Message], user_text: &str) -> StageOutcome {
        let objection = &self.responder.prompts().objection;

        if !session.extension_state.get_bool(RAISED_KEY).unwrap_or(false) {
            return StageOutcome::reply(objection.clone()).with_state(RAISED_KEY, true);
        }

        let context = format!("The objection you raised was: \"{objection}\"");
        let evaluation = self
            .responder
            .reply_or(
                Stage::ObjectionHandling,
                Some(&context),
                transcript,
                user_text,
                EVALUATION_FALLBACK,
            )
            .await;
        StageOutcome::completed(evaluation).with_state(REBUTTAL_KEY, user_text)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::prompts::StagePrompts;
    use uuid::Uuid;

    fn in_stage(raised: bool) -> Session {
        let mut session = Session::new(Uuid::new_v4());
        session.current_stage = Stage::ObjectionHandling;
        if raised {
            session.extension_state.insert(RAISED_KEY, true);
        }
        session
    }

    #[tokio::test]
    async fn test_first_turn_raises_fixed_objection() {
        let handler = ObjectionHandler::new(responder_with(untouched()));
        let outcome = handler.handle(&in_stage(false), &[], "Good morning doctor").await;
        assert!(!outcome.complete);
        assert_eq!(outcome.reply, StagePrompts::default().objection);
        assert_eq!(outcome.state_delta.get_bool(RAISED_KEY), Some(true));
    }

    #[tokio::test]
    async fn test_second_turn_always_completes() {
        let handler = ObjectionHandler::new(responder_with(replying("Solid answer, cite trial data next time.")));
        let outcome = handler.handle(&in_stage(true), &[], "uh, not sure").await;
        assert!(outcome.complete);
        assert_eq!(outcome.reply, "Solid answer, cite trial data next time.");
    }

    #[tokio::test]
    async fn test_second_turn_completes_on_generation_failure() {
        let handler = ObjectionHandler::new(responder_with(failing()));
        let outcome = handler.handle(&in_stage(true), &[], "Dexel has better absorption").await;
        assert!(outcome.complete);
        assert_eq!(outcome.reply, EVALUATION_FALLBACK);
    }
}
