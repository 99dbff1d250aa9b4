use super::{Responder, StageHandler, StageOutcome};
use crate::session::{Message, Session};
use async_trait::async_trait;
use serde_json::Value;

pub(crate) const ASKED_KEY: &str = "knowledge_check.asked";
const ANSWERS_KEY: &str = "knowledge_check.answers";
const CLOSING_LINE: &str =
    "Thank you. Your assessment is complete. Your trainer will receive your performance summary.";

/// Walks the trainee through a fixed, ordered quiz.
///
/// Each utterance answers the previously asked question; the handler then
/// asks the next one, and after the last answer it closes the stage.
pub struct KnowledgeCheckHandler {
    responder: Responder,
}

impl KnowledgeCheckHandler {
    pub fn new(responder: Responder) -> Self {
        Self { responder }
    }
}

#[async_trait]
impl StageHandler for KnowledgeCheckHandler {
    async fn handle(&self, session: &Session, _transcript: &[Message], user_text: &str) -> StageOutcome {
        let quiz = &self.responder.prompts().quiz;
        let asked = session.extension_state.get_u64(ASKED_KEY).unwrap_or(0) as usize;

        let mut answers: Vec<Value> = session
            .extension_state
            .get(ANSWERS_KEY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if asked > 0 {
            answers.push(serde_json::json!({
                "question": quiz.get(asked - 1).cloned().unwrap_or_default(),
                "answer": user_text,
            }));
        }

        let outcome = match quiz.get(asked) {
            Some(question) => StageOutcome::reply(question.clone()),
            None => StageOutcome::completed(CLOSING_LINE),
        };
        outcome
            .with_state(ASKED_KEY, (asked + 1).min(quiz.len()) as u64)
            .with_state(ANSWERS_KEY, answers)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::stage::Stage;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_needs_one_invocation_per_question_before_closing() {
        let handler = KnowledgeCheckHandler::new(responder_with(untouched()));
        let quiz = handler.responder.prompts().quiz.clone();
        let mut session = Session::new(Uuid::new_v4());
        session.current_stage = Stage::KnowledgeCheck;

        for (i, question) in quiz.iter().enumerate() {
            let outcome = handler.handle(&session, &[], &format!("answer {i}")).await;
            assert!(!outcome.complete);
            assert_eq!(&outcome.reply, question);
            session.merge_extension_state(outcome.state_delta);
        }

        let outcome = handler.handle(&session, &[], "final answer").await;
        assert!(outcome.complete);
        assert_eq!(outcome.reply, CLOSING_LINE);
        session.merge_extension_state(outcome.state_delta);

        let answers = session.extension_state.get(ANSWERS_KEY).unwrap().as_array().unwrap();
        assert_eq!(answers.len(), quiz.len());
        assert_eq!(answers[0]["question"], quiz[0].as_str());
        assert_eq!(answers[0]["answer"], "answer 1");
        assert_eq!(answers[quiz.len() - 1]["answer"], "final answer");
    }
}
