//! Coordination core for an AI radio station.
//!
//! Ingests real-time track events from an external audio engine, keeps a
//! durable play history, proactively produces spoken DJ intros through
//! tiered LLM/TTS providers, and serves clients over HTTP and WebSocket.

pub mod artwork;
pub mod bus;
pub mod config;
pub mod dj;
pub mod engine;
pub mod ingest;
pub mod providers;
pub mod scheduler;
pub mod server;
pub mod snapshot;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
