//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the orchestrator and provider clients.

use crate::config::Config;
use monica_core::{Orchestrator, live::LiveGenerator};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// The streaming voice provider; `None` disables the live channel's audio path.
    pub live: Option<Arc<dyn LiveGenerator>>,
    pub config: Arc<Config>,
}
