//! Stage registry: the static map from stage to behavior and persona.

use crate::handlers::{
    DataGatheringHandler, FeedbackHandler, KnowledgeCheckHandler, ObjectionHandler,
    PersonaProbeHandler, Responder, SetupHandler, StageHandler,
};
use crate::stage::{Persona, Stage};
use std::collections::HashMap;
use std::sync::Arc;

/// A configuration defect found while building the registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No handler registered for stage {0}")]
    MissingHandler(Stage),
    #[error("Stage {0} is terminal and cannot have a handler")]
    TerminalHandler(Stage),
}

/// One registry entry.
#[derive(Clone)]
pub struct StageEntry {
    pub handler: Arc<dyn StageHandler>,
    pub persona: Persona,
}

/// Maps every non-terminal stage to its handler and persona label.
///
/// Construction fails unless every non-terminal stage is covered, so a
/// built registry resolves every reachable stage.
pub struct StageRegistry {
    entries: HashMap<Stage, StageEntry>,
}

impl StageRegistry {
    /// Builds a registry from explicit handlers, checking coverage.
    pub fn from_handlers(
        handlers: impl IntoIterator<Item = (Stage, Arc<dyn StageHandler>)>,
    ) -> Result<Self, RegistryError> {
        let mut entries = HashMap::new();
        for (stage, handler) in handlers {
            if stage.is_terminal() {
                return Err(RegistryError::TerminalHandler(stage));
            }
            entries.insert(
                stage,
                StageEntry {
                    handler,
                    persona: stage.persona(),
                },
            );
        }
        if let Some(missing) = Stage::ALL
            .into_iter()
            .find(|s| !s.is_terminal() && !entries.contains_key(s))
        {
            return Err(RegistryError::MissingHandler(missing));
        }
        Ok(Self { entries })
    }

    /// The standard coaching flow's handlers, all sharing one responder.
    pub fn standard(responder: Responder) -> Result<Self, RegistryError> {
        let handlers: [(Stage, Arc<dyn StageHandler>); 6] = [
            (Stage::Setup, Arc::new(SetupHandler::new(responder.clone()))),
            (
                Stage::PrimaryDataGathering,
                Arc::new(DataGatheringHandler::new(responder.clone())),
            ),
            (Stage::Feedback, Arc::new(FeedbackHandler::new())),
            (
                Stage::PersonaProbe,
                Arc::new(PersonaProbeHandler::new(responder.clone())),
            ),
            (
                Stage::ObjectionHandling,
                Arc::new(ObjectionHandler::new(responder.clone())),
            ),
            (Stage::KnowledgeCheck, Arc::new(KnowledgeCheckHandler::new(responder))),
        ];
        Self::from_handlers(handlers)
    }

    /// The entry for `stage`, or `None` for the terminal stage.
    pub fn resolve(&self, stage: Stage) -> Option<&StageEntry> {
        self.entries.get(&stage)
    }
}
