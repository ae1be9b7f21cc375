//! Ordered fallback over provider tiers.
//!
//! Policy: try tier 1; on timeout, rate limit, error or a failed quality
//! gate, advance to the next tier. Never advance on success, regardless of
//! latency. Per-tier success/failure counters are kept for the debug
//! surface.

use super::llm::{LineRequest, LlmProvider};
use super::tts::{SynthesisRequest, TtsProvider};
use super::ProviderError;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-tier call discipline.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub timeout: Duration,
    pub retries: u32,
    pub rate_limit_delay: Duration,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            retries: 0,
            rate_limit_delay: Duration::from_secs(2),
        }
    }
}

struct Tier<P: ?Sized> {
    provider: Arc<P>,
    config: TierConfig,
    successes: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub name: String,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone)]
pub struct GeneratedLine {
    pub text: String,
    pub provider: String,
}

#[derive(Debug, Clone)]
pub struct SynthesizedClip {
    pub provider: String,
}

/// Run one tier with its retry/rate-limit discipline. `call` performs the
/// attempt; `validate` applies the caller's quality gates to a success.
async fn run_tier<T, F, Fut, V>(
    name: &str,
    config: &TierConfig,
    call: F,
    validate: V,
) -> Result<T, String>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
    V: Fn(&T) -> Result<(), String>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => {
                return match validate(&value) {
                    Ok(()) => Ok(value),
                    // Quality rejection advances the tier without retrying it.
                    Err(reason) => Err(format!("quality gate: {}", reason)),
                };
            }
            Err(ProviderError::RateLimited) if attempt < config.retries => {
                debug!(provider = %name, "Rate limited, backing off before retry");
                tokio::time::sleep(config.rate_limit_delay).await;
            }
            Err(e) if attempt < config.retries => {
                debug!(provider = %name, error = %e, attempt, "Provider attempt failed, retrying");
            }
            Err(e) => return Err(e.to_string()),
        }
        attempt += 1;
    }
}

#[derive(Default)]
pub struct LlmRegistry {
    tiers: Vec<Tier<dyn LlmProvider>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self { tiers: Vec::new() }
    }

    pub fn push_tier(&mut self, provider: Arc<dyn LlmProvider>, config: TierConfig) {
        self.tiers.push(Tier {
            provider,
            config,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
    }

    /// Generate one line, walking tiers until a result passes `validate`.
    pub async fn generate(
        &self,
        request: &LineRequest,
        validate: &(dyn Fn(&str) -> Result<(), String> + Sync),
    ) -> Result<GeneratedLine, ProviderError> {
        for tier in &self.tiers {
            let name = tier.provider.name().to_string();
            let outcome = run_tier(
                &name,
                &tier.config,
                || tier.provider.generate(request, tier.config.timeout),
                |text: &String| validate(text),
            )
            .await;

            match outcome {
                Ok(text) => {
                    tier.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(GeneratedLine {
                        text,
                        provider: name,
                    });
                }
                Err(reason) => {
                    tier.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(provider = %name, reason = %reason, "LLM tier failed, advancing");
                }
            }
        }
        Err(ProviderError::Exhausted)
    }

    pub fn stats(&self) -> Vec<TierStats> {
        self.tiers
            .iter()
            .map(|tier| TierStats {
                name: tier.provider.name().to_string(),
                successes: tier.successes.load(Ordering::Relaxed),
                failures: tier.failures.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[derive(Default)]
pub struct TtsRegistry {
    tiers: Vec<Tier<dyn TtsProvider>>,
}

impl TtsRegistry {
    pub fn new() -> Self {
        Self { tiers: Vec::new() }
    }

    pub fn push_tier(&mut self, provider: Arc<dyn TtsProvider>, config: TierConfig) {
        self.tiers.push(Tier {
            provider,
            config,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
    }

    /// Synthesize a clip, walking tiers until the produced file passes
    /// `validate` (existence, minimum size, container magic).
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest<'_>,
        validate: &(dyn Fn(&Path) -> Result<(), String> + Sync),
    ) -> Result<SynthesizedClip, ProviderError> {
        for tier in &self.tiers {
            let name = tier.provider.name().to_string();
            let outcome = run_tier(
                &name,
                &tier.config,
                || tier.provider.synthesize(request, tier.config.timeout),
                |_: &()| validate(request.out_path),
            )
            .await;

            match outcome {
                Ok(()) => {
                    tier.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(SynthesizedClip { provider: name });
                }
                Err(reason) => {
                    tier.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(provider = %name, reason = %reason, "TTS tier failed, advancing");
                }
            }
        }
        Err(ProviderError::Exhausted)
    }

    pub fn stats(&self) -> Vec<TierStats> {
        self.tiers
            .iter()
            .map(|tier| TierStats {
                name: tier.provider.name().to_string(),
                successes: tier.successes.load(Ordering::Relaxed),
                failures: tier.failures.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedLlm {
        name: &'static str,
        responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    }

    impl ScriptedLlm {
        fn new(name: &'static str, responses: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(
            &self,
            _request: &LineRequest,
            _timeout: Duration,
        ) -> Result<String, ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Exhausted))
        }
    }

    fn request() -> LineRequest {
        LineRequest {
            prompt: "introduce the track".to_string(),
            title: "T".to_string(),
            artist: "A".to_string(),
        }
    }

    fn accept_all(_: &str) -> Result<(), String> {
        Ok(())
    }

    #[tokio::test]
    async fn first_tier_success_short_circuits() {
        let mut registry = LlmRegistry::new();
        registry.push_tier(
            ScriptedLlm::new("one", vec![Ok("line one".to_string())]),
            TierConfig::default(),
        );
        registry.push_tier(
            ScriptedLlm::new("two", vec![Ok("line two".to_string())]),
            TierConfig::default(),
        );

        let line = registry.generate(&request(), &accept_all).await.unwrap();
        assert_eq!(line.text, "line one");
        assert_eq!(line.provider, "one");

        let stats = registry.stats();
        assert_eq!(stats[0].successes, 1);
        assert_eq!(stats[1].successes, 0);
    }

    #[tokio::test]
    async fn errors_advance_to_next_tier() {
        let mut registry = LlmRegistry::new();
        registry.push_tier(
            ScriptedLlm::new("one", vec![Err(ProviderError::Timeout)]),
            TierConfig::default(),
        );
        registry.push_tier(
            ScriptedLlm::new("two", vec![Ok("fallback line".to_string())]),
            TierConfig::default(),
        );

        let line = registry.generate(&request(), &accept_all).await.unwrap();
        assert_eq!(line.provider, "two");
        assert_eq!(registry.stats()[0].failures, 1);
    }

    #[tokio::test]
    async fn quality_rejection_advances_without_retry() {
        let mut registry = LlmRegistry::new();
        registry.push_tier(
            ScriptedLlm::new(
                "one",
                vec![
                    Ok("bad line".to_string()),
                    Ok("never consumed".to_string()),
                ],
            ),
            TierConfig {
                retries: 3,
                ..Default::default()
            },
        );
        registry.push_tier(
            ScriptedLlm::new("two", vec![Ok("good line".to_string())]),
            TierConfig::default(),
        );

        let validate = |text: &str| {
            if text.starts_with("bad") {
                Err("forbidden content".to_string())
            } else {
                Ok(())
            }
        };
        let line = registry.generate(&request(), &validate).await.unwrap();
        assert_eq!(line.text, "good line");
    }

    #[tokio::test]
    async fn retries_within_tier_before_advancing() {
        let mut registry = LlmRegistry::new();
        registry.push_tier(
            ScriptedLlm::new(
                "flaky",
                vec![
                    Err(ProviderError::Connection("reset".to_string())),
                    Ok("recovered".to_string()),
                ],
            ),
            TierConfig {
                retries: 1,
                ..Default::default()
            },
        );

        let line = registry.generate(&request(), &accept_all).await.unwrap();
        assert_eq!(line.text, "recovered");
        assert_eq!(registry.stats()[0].successes, 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_error() {
        let mut registry = LlmRegistry::new();
        registry.push_tier(
            ScriptedLlm::new("one", vec![Err(ProviderError::Timeout)]),
            TierConfig::default(),
        );

        let result = registry.generate(&request(), &accept_all).await;
        assert!(matches!(result, Err(ProviderError::Exhausted)));
    }

    struct ScriptedTts {
        name: &'static str,
        results: Mutex<VecDeque<Result<(), ProviderError>>>,
        payload: &'static [u8],
    }

    #[async_trait]
    impl TtsProvider for ScriptedTts {
        fn name(&self) -> &str {
            self.name
        }

        async fn synthesize(
            &self,
            request: &SynthesisRequest<'_>,
            _timeout: Duration,
        ) -> Result<(), ProviderError> {
            let result = self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Exhausted));
            if result.is_ok() {
                std::fs::write(request.out_path, self.payload).unwrap();
            }
            result
        }
    }

    #[tokio::test]
    async fn tts_file_validation_drives_fallback() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("clip.mp3");

        let mut registry = TtsRegistry::new();
        registry.push_tier(
            Arc::new(ScriptedTts {
                name: "tiny",
                results: Mutex::new(vec![Ok(())].into()),
                payload: b"x", // too small to be a real clip
            }),
            TierConfig::default(),
        );
        registry.push_tier(
            Arc::new(ScriptedTts {
                name: "real",
                results: Mutex::new(vec![Ok(())].into()),
                payload: &[0u8; 2048],
            }),
            TierConfig::default(),
        );

        let validate = |path: &Path| {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size < 1000 {
                Err(format!("clip too small: {} bytes", size))
            } else {
                Ok(())
            }
        };
        let clip = registry
            .synthesize(
                &SynthesisRequest {
                    text: "hello",
                    voice: "en",
                    language: "en",
                    out_path: &out,
                },
                &validate,
            )
            .await
            .unwrap();
        assert_eq!(clip.provider, "real");
    }
}
