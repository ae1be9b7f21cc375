//! Tiered LLM and TTS providers behind an ordered fallback registry.

pub mod llm;
mod registry;
pub mod tts;

pub use registry::{GeneratedLine, LlmRegistry, SynthesizedClip, TierConfig, TierStats, TtsRegistry};

use thiserror::Error;

/// Errors surfaced by LLM/TTS backends.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("request timeout")]
    Timeout,

    #[error("all provider tiers exhausted")]
    Exhausted,
}
