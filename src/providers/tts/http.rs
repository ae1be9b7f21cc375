//! HTTP synthesis-server TTS provider (XTTS-style API).

use super::{SynthesisRequest, TtsProvider};
use crate::providers::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub struct HttpTtsProvider {
    client: Client,
    base_url: String,
    name: String,
}

impl HttpTtsProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            name: name.into(),
        }
    }
}

#[derive(Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    speaker: &'a str,
    language: &'a str,
}

#[async_trait]
impl TtsProvider for HttpTtsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(
        &self,
        request: &SynthesisRequest<'_>,
        timeout: Duration,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/tts", self.base_url.trim_end_matches('/'));
        debug!(provider = %self.name, chars = request.text.len(), "Synthesizing clip");

        let response = self
            .client
            .post(&url)
            .json(&SynthesisBody {
                text: request.text,
                speaker: request.voice,
                language: request.language,
            })
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        if audio.is_empty() {
            return Err(ProviderError::InvalidResponse("empty audio body".to_string()));
        }

        tokio::fs::write(request.out_path, &audio)
            .await
            .map_err(|e| ProviderError::Connection(format!("cannot write clip: {}", e)))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::Api {
                status: response.status().as_u16(),
                message: String::new(),
            })
        }
    }
}
