//! Bridge narration emitted once at specific stage transitions.

use crate::session::Session;
use crate::stage::Stage;

/// Synthesizes hand-off text between adjacent stages.
#[derive(Debug, Clone)]
pub struct BridgeNarrator {
    product: String,
}

impl BridgeNarrator {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
        }
    }

    /// Narration for the `from → to` transition, or `None` when the pair has no bridge.
    ///
    /// `session` is the state after the transition.
    pub fn narrate(&self, from: Stage, to: Stage, session: &Session) -> Option<String> {
        let name = session.profile.name.as_deref().unwrap_or("there");
        match (from, to) {
            (Stage::Setup, Stage::PrimaryDataGathering) => Some(format!(
                "Thank you, {name}. Your session is now configured for the {} division and the product {}.\n\n\
                 You are now entering a Retail Chemist RCPA call. I will act as the chemist. \
                 Begin by asking me about the doctor's prescribing behaviour.",
                session.profile.division.as_deref().unwrap_or("selected"),
                self.product,
            )),
            (Stage::PrimaryDataGathering, Stage::Feedback) => Some(
                "That ends the chemist call. Stepping back into my coaching role: \
                 let me know when you are ready for feedback on your RCPA."
                    .to_string(),
            ),
            (Stage::Feedback, Stage::PersonaProbe) => Some(
                "I will now be acting as Dr. Monica. Before you begin your pitch, \
                 what questions will you ask to understand my treatment goals?"
                    .to_string(),
            ),
            (Stage::ObjectionHandling, Stage::KnowledgeCheck) => Some(format!(
                "Coach here again, {name}. Let's finish with a quick knowledge check on {}. \
                 Tell me when you are ready for the first question.",
                self.product
            )),
            (Stage::KnowledgeCheck, Stage::End) => Some(self.closing_summary(session)),
            _ => None,
        }
    }

    /// The closing line for a finished session. Deterministic, so it can be
    /// re-emitted for any number of turns after the flow has ended.
    pub fn closing_summary(&self, session: &Session) -> String {
        format!(
            "Your {} coaching session is complete, {}. Your trainer will receive your performance summary. Goodbye!",
            self.product,
            session.profile.name.as_deref().unwrap_or("there"),
        )
    }
}
