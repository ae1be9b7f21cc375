//! HTTP ingestion path for injected clips.
//!
//! When the engine exposes an audio ingestion slot, clips are shipped as a
//! raw `PUT /<slot>` with `Content-Type: audio/mpeg`. This avoids
//! interleaving bulk audio with the control plane.

use super::adapter::EngineError;
use std::path::Path;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpIngestClient {
    client: reqwest::Client,
    url: String,
}

impl HttpIngestClient {
    pub fn new(base_url: &str, slot: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/{}", base_url.trim_end_matches('/'), slot),
        }
    }

    pub async fn put_audio(&self, path: &Path) -> Result<(), EngineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::Unavailable(format!("cannot read clip: {}", e)))?;

        let response = self
            .client
            .put(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "audio/mpeg")
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}
