use super::{Responder, StageHandler, StageOutcome};
use crate::phrases;
use crate::session::{Message, Session};
use crate::stage::Stage;
use async_trait::async_trait;

const SIGN_OFF: &str = "You're welcome. Have a good day.";
const FALLBACK: &str = "I'm not sure about that. Anything else you need?";

/// The retail chemist in an RCPA call: answers only what is asked.
pub struct DataGatheringHandler {
    responder: Responder,
}

impl DataGatheringHandler {
    pub fn new(responder: Responder) -> Self {
        Self { responder }
    }
}

#[async_trait]
impl StageHandler for DataGatheringHandler {
    async fn handle(&self, _session: &Session, transcript: &[Message], user_text: &str) -> StageOutcome {
        // A closing phrase ends the call with a plain chemist sign-off.
        if phrases::is_chemist_closing(user_text) {
            return StageOutcome::completed(SIGN_OFF);
        }

        let reply = self
            .responder
            .reply_or(
                Stage::PrimaryDataGathering,
                Some("Answer only the question asked. Do not volunteer anything else."),
                transcript,
                user_text,
                FALLBACK,
            )
            .await;
        StageOutcome::reply(reply)
    }
}
