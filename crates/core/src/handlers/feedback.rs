use super::{StageHandler, StageOutcome};
use crate::phrases::normalize;
use crate::session::{Message, MessageRole, Session, messages_in_stage};
use crate::stage::Stage;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// The fixed checklist of probes a trainee should cover in the chemist call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeItem {
    Brand,
    Formulation,
    PrescriptionVolume,
    DosingFrequency,
    PatientType,
    CompetitorBrands,
}

impl ProbeItem {
    pub const ALL: [ProbeItem; 6] = [
        ProbeItem::Brand,
        ProbeItem::Formulation,
        ProbeItem::PrescriptionVolume,
        ProbeItem::DosingFrequency,
        ProbeItem::PatientType,
        ProbeItem::CompetitorBrands,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ProbeItem::Brand => "brand",
            ProbeItem::Formulation => "formulation",
            ProbeItem::PrescriptionVolume => "prescription volume",
            ProbeItem::DosingFrequency => "dosing frequency",
            ProbeItem::PatientType => "patient type",
            ProbeItem::CompetitorBrands => "competitor brands",
        }
    }

    fn why_it_matters(self) -> &'static str {
        match self {
            ProbeItem::Brand => "knowing which brand is prescribed tells you who you are displacing",
            ProbeItem::Formulation => "the formulation tells you which variant to lead with",
            ProbeItem::PrescriptionVolume => "volume tells you how much potential the doctor really has",
            ProbeItem::DosingFrequency => {
                "whether the prescription is daily, weekly or monthly shapes how you position the product to the doctor"
            }
            ProbeItem::PatientType => "the patient profile decides which benefit will land with the doctor",
            ProbeItem::CompetitorBrands => "competitor usage tells you which objection to prepare for",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            ProbeItem::Brand => r"\b(?:brand|brands|which product|what product)\b",
            ProbeItem::Formulation => {
                r"\b(?:formulation|tablets?|capsules?|sachets?|syrup|injections?|drops|strength|60k|mg|iu)\b"
            }
            ProbeItem::PrescriptionVolume => {
                r"\b(?:how many|volume|quantity|strips|units|per month|per week|potential|sales|moving)\b"
            }
            ProbeItem::DosingFrequency => {
                r"\b(?:dose|doses|dosing|dosage|frequency|daily|weekly|monthly|once a|twice|how often)\b"
            }
            ProbeItem::PatientType => {
                r"\b(?:patients?|elderly|age group|women|men|pregnant|diabetics?|who buys|kind of people)\b"
            }
            ProbeItem::CompetitorBrands => {
                r"\b(?:competitors?|competition|other brands?|switch|alternatives?)\b"
            }
        }
    }
}

static CHECKLIST: LazyLock<Vec<(ProbeItem, Regex)>> = LazyLock::new(|| {
    ProbeItem::ALL
        .into_iter()
        .map(|item| (item, Regex::new(item.pattern()).expect("valid checklist pattern")))
        .collect()
});

/// Splits the checklist into items the trainee probed and items they missed,
/// judged from the trainee's own lines in the chemist call.
pub fn assess_probes(transcript: &[Message]) -> (Vec<ProbeItem>, Vec<ProbeItem>) {
    let asked: Vec<String> = messages_in_stage(transcript, Stage::PrimaryDataGathering)
        .filter(|m| m.role == MessageRole::User)
        .map(|m| normalize(&m.content))
        .collect();

    CHECKLIST
        .iter()
        .map(|(item, re)| (*item, asked.iter().any(|line| re.is_match(line))))
        .fold((Vec::new(), Vec::new()), |(mut covered, mut missed), (item, hit)| {
            if hit {
                covered.push(item);
            } else {
                missed.push(item);
            }
            (covered, missed)
        })
}

fn labels(items: &[ProbeItem]) -> Vec<&'static str> {
    items.iter().map(|i| i.label()).collect()
}

fn join_labels(items: &[ProbeItem]) -> String {
    match labels(items).as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Single-turn coaching critique of the chemist call.
#[derive(Default)]
pub struct FeedbackHandler;

impl FeedbackHandler {
    pub fn new() -> Self {
        Self
    }

    fn critique(covered: &[ProbeItem], missed: &[ProbeItem]) -> String {
        let strength = if covered.is_empty() {
            "Good job keeping the call professional and getting the chemist talking.".to_string()
        } else {
            format!("Good job gathering core prescription details. You covered {} well.", join_labels(covered))
        };

        let gap = match missed.first() {
            Some(item) => format!(
                " One gap was {}: {}.",
                item.label(),
                item.why_it_matters()
            ),
            None => {
                let deepen = ProbeItem::DosingFrequency;
                format!(
                    " You touched every item on the checklist. Next time go deeper on {}: {}.",
                    deepen.label(),
                    deepen.why_it_matters()
                )
            }
        };

        let extra = if missed.len() > 1 {
            format!(" Also remember to ask about {}.", join_labels(&missed[1..]))
        } else {
            String::new()
        };

        format!("{strength}{gap}{extra} That insight will help you tailor your doctor pitch more precisely.")
    }
}

#[async_trait]
impl StageHandler for FeedbackHandler {
    async fn handle(&self, session: &Session, transcript: &[Message], _user_text: &str) -> StageOutcome {
        let (covered, missed) = assess_probes(transcript);
        debug!(session_id = %session.id, covered = ?labels(&covered), missed = ?labels(&missed), "Assessed chemist call.");

        StageOutcome::completed(Self::critique(&covered, &missed))
            .with_state("feedback.strengths", labels(&covered))
            .with_state("feedback.missed", labels(&missed))
    }
}
