//! Stage and persona identities.
//!
//! The coaching flow is a fixed, totally ordered walk through [`Stage`]s.
//! Each stage is voiced by exactly one [`Persona`], given by a static table,
//! so the persona is always a projection of the stage and never stored
//! independently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One phase of the coaching sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Setup,
    PrimaryDataGathering,
    Feedback,
    PersonaProbe,
    ObjectionHandling,
    KnowledgeCheck,
    End,
}

/// The character voice a reply is delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    Coach,
    Chemist,
    Doctor,
}

impl Stage {
    /// Every stage in sequence order.
    pub const ALL: [Stage; 7] = [
        Stage::Setup,
        Stage::PrimaryDataGathering,
        Stage::Feedback,
        Stage::PersonaProbe,
        Stage::ObjectionHandling,
        Stage::KnowledgeCheck,
        Stage::End,
    ];

    /// The stage every new session starts in.
    pub const FIRST: Stage = Stage::Setup;

    /// The stage that follows this one, or `None` for the terminal stage.
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Whether this stage is terminal.
    pub fn is_terminal(self) -> bool {
        self == Stage::End
    }

    /// The persona assigned to this stage by the static stage table.
    pub fn persona(self) -> Persona {
        match self {
            Stage::Setup => Persona::Coach,
            Stage::PrimaryDataGathering => Persona::Chemist,
            Stage::Feedback => Persona::Coach,
            Stage::PersonaProbe => Persona::Doctor,
            Stage::ObjectionHandling => Persona::Doctor,
            Stage::KnowledgeCheck => Persona::Coach,
            Stage::End => Persona::Coach,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "SETUP",
            Stage::PrimaryDataGathering => "PRIMARY_DATA_GATHERING",
            Stage::Feedback => "FEEDBACK",
            Stage::PersonaProbe => "PERSONA_PROBE",
            Stage::ObjectionHandling => "OBJECTION_HANDLING",
            Stage::KnowledgeCheck => "KNOWLEDGE_CHECK",
            Stage::End => "END",
        }
    }
}

impl Persona {
    pub fn as_str(self) -> &'static str {
        match self {
            Persona::Coach => "COACH",
            Persona::Chemist => "CHEMIST",
            Persona::Doctor => "DOCTOR",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored or submitted identifier names no known stage or persona.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown {kind} identifier: '{value}'")]
pub struct ParseIdentError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Stage {
    type Err = ParseIdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseIdentError {
                kind: "stage",
                value: s.to_string(),
            })
    }
}

impl FromStr for Persona {
    type Err = ParseIdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Persona::Coach, Persona::Chemist, Persona::Doctor]
            .into_iter()
            .find(|persona| persona.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseIdentError {
                kind: "persona",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_walks_forward_one_step() {
        assert_eq!(Stage::Setup.next(), Some(Stage::PrimaryDataGathering));
        assert_eq!(Stage::PrimaryDataGathering.next(), Some(Stage::Feedback));
        assert_eq!(Stage::Feedback.next(), Some(Stage::PersonaProbe));
        assert_eq!(Stage::PersonaProbe.next(), Some(Stage::ObjectionHandling));
        assert_eq!(Stage::ObjectionHandling.next(), Some(Stage::KnowledgeCheck));
        assert_eq!(Stage::KnowledgeCheck.next(), Some(Stage::End));
        assert_eq!(Stage::End.next(), None);
    }

    #[test]
    fn test_next_is_strictly_increasing() {
        for stage in Stage::ALL {
            if let Some(next) = stage.next() {
                assert!(next > stage);
            }
        }
    }

    #[test]
    fn test_persona_table() {
        assert_eq!(Stage::Setup.persona(), Persona::Coach);
        assert_eq!(Stage::PrimaryDataGathering.persona(), Persona::Chemist);
        assert_eq!(Stage::Feedback.persona(), Persona::Coach);
        assert_eq!(Stage::PersonaProbe.persona(), Persona::Doctor);
        assert_eq!(Stage::ObjectionHandling.persona(), Persona::Doctor);
        assert_eq!(Stage::KnowledgeCheck.persona(), Persona::Coach);
        assert_eq!(Stage::End.persona(), Persona::Coach);
    }

    #[test]
    fn test_parse_and_display_agree() {
        for stage in Stage::ALL {
            assert_eq!(stage.to_string().parse::<Stage>(), Ok(stage));
        }
        assert_eq!("knowledge_check".parse::<Stage>(), Ok(Stage::KnowledgeCheck));
        assert_eq!("doctor".parse::<Persona>(), Ok(Persona::Doctor));
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        let err = "RCPA".parse::<Stage>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown stage identifier: 'RCPA'");
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&Stage::PrimaryDataGathering).unwrap();
        assert_eq!(json, "\"PRIMARY_DATA_GATHERING\"");
        let persona: Persona = serde_json::from_str("\"CHEMIST\"").unwrap();
        assert_eq!(persona, Persona::Chemist);
    }
}
