//! LLM provider trait and implementations for DJ line generation.

mod ollama;
mod openai;
mod template;

pub use ollama::OllamaProvider;
pub use openai::{ApiKeySource, OpenAiProvider};
pub use template::TemplateProvider;

use super::ProviderError;
use async_trait::async_trait;
use std::time::Duration;

/// One request for a spoken line about a specific track.
#[derive(Debug, Clone)]
pub struct LineRequest {
    /// Fully rendered prompt, including mode/style instructions.
    pub prompt: String,
    pub title: String,
    pub artist: String,
}

/// A text generator for DJ lines.
///
/// Implementations connect to different backends (hosted APIs, local
/// models, offline templates) behind a single interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Produce one spoken line for the request. The implementation must
    /// respect `timeout` for any network calls.
    async fn generate(
        &self,
        request: &LineRequest,
        timeout: Duration,
    ) -> Result<String, ProviderError>;

    /// Check the backend is reachable.
    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
