//! Stage orchestration core for the Monica coaching role-play.
//!
//! A session moves through a fixed sequence of stages, each voiced by one
//! persona. The [`orchestrator::Orchestrator`] routes every utterance to the
//! current stage's handler, decides whether the stage is complete, performs
//! the transition with its bridge narration, and records an append-only
//! transcript. Storage and text generation are consumed through traits so
//! that transports and backends live outside this crate.

pub mod bridge;
pub mod channel;
pub mod detector;
pub mod handlers;
pub mod live;
pub mod llm_client;
pub mod orchestrator;
pub mod phrases;
pub mod prompts;
pub mod registry;
pub mod repository;
pub mod session;
pub mod stage;

pub use orchestrator::{Orchestrator, OrchestratorError, StageTransition, TurnResult};
pub use session::{Message, MessageRole, Session};
pub use stage::{Persona, Stage};
