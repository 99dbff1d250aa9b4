//! Real-time, provider-specific connections for voice I/O.

pub mod gemini;

use crate::config::Config;
use monica_core::live::LiveGenerator;
use std::sync::Arc;
use tracing::info;

pub use gemini::GeminiLiveClient;

/// Builds the live voice provider, when one is configured.
///
/// Live voice needs a Gemini key regardless of the chat provider.
pub fn live_generator(config: &Config) -> Option<Arc<dyn LiveGenerator>> {
    match &config.gemini_api_key {
        Some(key) => Some(Arc::new(GeminiLiveClient::new(
            key.clone(),
            config.live_model.clone(),
        ))),
        None => {
            info!("GEMINI_API_KEY not set; live voice is disabled.");
            None
        }
    }
}
