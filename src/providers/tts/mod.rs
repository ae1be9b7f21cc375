//! TTS provider trait and implementations for clip synthesis.

mod command;
mod http;

pub use command::CommandTtsProvider;
pub use http::HttpTtsProvider;

use super::ProviderError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// One request to synthesize a spoken clip to a file on the shared path.
#[derive(Debug, Clone)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub voice: &'a str,
    pub language: &'a str,
    pub out_path: &'a Path,
}

/// A speech synthesizer writing an audio file for validated DJ text.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Synthesize `text` into `out_path`. The implementation must respect
    /// `timeout` for any external calls.
    async fn synthesize(
        &self,
        request: &SynthesisRequest<'_>,
        timeout: Duration,
    ) -> Result<(), ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
