//! Monica API Library Crate
//!
//! This library contains the web service around the coaching orchestrator:
//! configuration, PostgreSQL session storage, REST handlers, WebSocket
//! voice channel, and routing. The `api` binary is a thin wrapper around it.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
