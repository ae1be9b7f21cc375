//! Terminal TTS tier: local subprocess synthesis.
//!
//! Runs a configured command (espeak-ng, flite, a wrapper script) with
//! `{text}`, `{voice}` and `{out}` placeholders substituted per argument.
//! Lower quality than the network tiers, but always available.

use super::{SynthesisRequest, TtsProvider};
use crate::providers::ProviderError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_COMMAND: &[&str] = &["espeak-ng", "-v", "{voice}", "-w", "{out}", "{text}"];

pub struct CommandTtsProvider {
    argv: Vec<String>,
}

impl CommandTtsProvider {
    pub fn new(argv: Vec<String>) -> Self {
        let argv = if argv.is_empty() {
            DEFAULT_COMMAND.iter().map(|s| s.to_string()).collect()
        } else {
            argv
        };
        Self { argv }
    }
}

impl Default for CommandTtsProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl TtsProvider for CommandTtsProvider {
    fn name(&self) -> &str {
        "command"
    }

    async fn synthesize(
        &self,
        request: &SynthesisRequest<'_>,
        timeout: Duration,
    ) -> Result<(), ProviderError> {
        let out = request.out_path.to_string_lossy();
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| {
                arg.replace("{text}", request.text)
                    .replace("{voice}", request.voice)
                    .replace("{lang}", request.language)
                    .replace("{out}", &out)
            })
            .collect();

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ProviderError::InvalidResponse("empty synth command".to_string()))?;

        debug!(program = %program, "Running offline synth");

        let result = tokio::time::timeout(
            timeout,
            Command::new(program).args(args).output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProviderError::Connection(e.to_string())),
            Err(_) => return Err(ProviderError::Timeout),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Api {
                status: output.status.code().unwrap_or(-1).unsigned_abs() as u16,
                message: stderr.to_string(),
            });
        }
        Ok(())
    }
}
