//! WebSocket Session Management
//!
//! The streaming side of the dual-mode channel. It is structured into
//! submodules:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle for one coaching session.
//! - `provider`: Handles connections to third-party real-time voice APIs (Gemini Live).

pub mod protocol;
pub mod provider;
pub mod session;

pub use provider::live_generator;
pub use session::ws_handler;
