//! Persona prompt configuration.
//!
//! Prompt wording is opaque configuration: every stage gets a persona
//! prompt, and the objection text and quiz are configurable too. Built-in
//! defaults can be overridden per key by `<key>.md` files in a directory.

use crate::stage::Stage;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_SYSTEM: &str = "You are Agent Monica 007, an AI-powered sales coach. \
You guide Business Managers (BM) and Product Leaders (PL) through a staged role-play. \
Stay in character for the current stage, be concise, and never jump stages yourself.";

const DEFAULT_SETUP: &str = "You are Agent Monica (Coach). Collect the trainee's name, role \
(BM or PL), HQ and division. Ask only for the missing fields, in one short conversational line.";

const DEFAULT_DATA_GATHERING: &str = "You are Agent Monica acting as a RETAIL CHEMIST in an RCPA call. \
Answer only what the Business Manager asks. Do not explain products, pitch, coach or guide. \
Keep replies short, practical and realistic.";

const DEFAULT_FEEDBACK: &str = "You are Agent Monica as a COACH giving short, actionable feedback \
on the RCPA call: what went well, what was missing, one concrete tip.";

const DEFAULT_PERSONA_PROBE: &str = "You are Agent Monica acting as a practicing DOCTOR in India. \
Answer the representative's probing questions, listen to the pitch, challenge it with clinical points. \
Be realistic and concise. Do not restart the conversation or repeat what you already said.";

const DEFAULT_OBJECTION_HANDLING: &str = "You are Agent Monica acting as a practicing DOCTOR. \
You raised an objection and the representative has responded. Evaluate the answer in 2-3 lines: \
one strength, one improvement area. Then close.";

const DEFAULT_KNOWLEDGE_CHECK: &str = "You are Agent Monica as a COACH running a short knowledge check.";

const DEFAULT_OBJECTION: &str =
    "My current Vitamin D brand works well and is affordable. Why should I change it?";

const DEFAULT_QUIZ: [&str; 3] = [
    "What is IL-6?",
    "What is the relationship between IL-6 and pain?",
    "Name two other inflammatory mediators besides IL-6.",
];

/// The file stem that overrides a stage's persona prompt.
fn stage_key(stage: Stage) -> &'static str {
    match stage {
        Stage::Setup => "setup",
        Stage::PrimaryDataGathering => "primary_data_gathering",
        Stage::Feedback => "feedback",
        Stage::PersonaProbe => "persona_probe",
        Stage::ObjectionHandling => "objection_handling",
        Stage::KnowledgeCheck => "knowledge_check",
        Stage::End => "end",
    }
}

/// Prompt strings for every stage plus the fixed scenario content.
#[derive(Debug, Clone)]
pub struct StagePrompts {
    pub system: String,
    stage_prompts: HashMap<Stage, String>,
    /// The fixed objection raised on the first objection-handling turn.
    pub objection: String,
    /// Ordered knowledge-check questions.
    pub quiz: Vec<String>,
}

impl Default for StagePrompts {
    fn default() -> Self {
        let stage_prompts = [
            (Stage::Setup, DEFAULT_SETUP),
            (Stage::PrimaryDataGathering, DEFAULT_DATA_GATHERING),
            (Stage::Feedback, DEFAULT_FEEDBACK),
            (Stage::PersonaProbe, DEFAULT_PERSONA_PROBE),
            (Stage::ObjectionHandling, DEFAULT_OBJECTION_HANDLING),
            (Stage::KnowledgeCheck, DEFAULT_KNOWLEDGE_CHECK),
        ]
        .into_iter()
        .map(|(stage, prompt)| (stage, prompt.to_string()))
        .collect();

        Self {
            system: DEFAULT_SYSTEM.to_string(),
            stage_prompts,
            objection: DEFAULT_OBJECTION.to_string(),
            quiz: DEFAULT_QUIZ.iter().map(|q| q.to_string()).collect(),
        }
    }
}

impl StagePrompts {
    /// Loads overrides from `dir` on top of the defaults.
    ///
    /// A missing directory is not an error; unreadable files are.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut prompts = Self::default();
        if !dir.is_dir() {
            info!(path = %dir.display(), "Prompts directory not found, using built-in prompts.");
            return Ok(prompts);
        }

        let mut files = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
                let key = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Could not get file stem")?
                    .to_string();
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
                files.insert(key, content.trim().to_string());
            }
        }

        if let Some(system) = files.remove("system") {
            prompts.system = system;
        }
        if let Some(objection) = files.remove("objection") {
            prompts.objection = objection;
        }
        if let Some(quiz) = files.remove("quiz") {
            let questions: Vec<String> = quiz
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if !questions.is_empty() {
                prompts.quiz = questions;
            }
        }
        for stage in Stage::ALL {
            if let Some(prompt) = files.remove(stage_key(stage)) {
                debug!(%stage, "Overriding stage prompt from file.");
                prompts.stage_prompts.insert(stage, prompt);
            }
        }
        Ok(prompts)
    }

    /// The persona prompt for `stage`, empty for stages without one.
    pub fn for_stage(&self, stage: Stage) -> &str {
        self.stage_prompts.get(&stage).map(String::as_str).unwrap_or("")
    }

    /// The full system context for a stage: base prompt, persona prompt, and stage header.
    pub fn system_context(&self, stage: Stage) -> String {
        format!(
            "{}\n\n{}\n\nCURRENT STAGE: {}\nPERSONA: {}",
            self.system,
            self.for_stage(stage),
            stage,
            stage.persona()
        )
    }
}
