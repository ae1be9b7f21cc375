//! Configuration resolution: CLI arguments plus an optional TOML file,
//! with file values taking precedence. Secrets (provider API keys) come
//! from the environment, never from CLI flags.

mod file_config;

pub use file_config::{
    DjConfig, EngineConfig, FileConfig, LlmTierConfig, RetentionConfig, SnapshotConfig,
    TtsTierConfig,
};

use crate::dj::{DjPipelineSettings, TextGuardrails};
use crate::engine::ControlPortSettings;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Default environment variable consulted for LLM API keys when a tier
/// names neither a key nor a key source.
pub const DEFAULT_LLM_API_KEY_ENV: &str = "AI_RADIO_LLM_API_KEY";

/// CLI arguments subject to config-file override.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub host: String,
    pub port: u16,
    pub db_path: Option<PathBuf>,
    pub tts_dir: Option<PathBuf>,
    pub artwork_cache_dir: Option<PathBuf>,
    pub music_roots: Vec<PathBuf>,
    pub frontend_dir_path: Option<String>,
    pub logging_level: RequestsLoggingLevel,
    pub engine_host: String,
    pub engine_port: u16,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5055,
            db_path: None,
            tts_dir: None,
            artwork_cache_dir: None,
            music_roots: Vec::new(),
            frontend_dir_path: None,
            logging_level: RequestsLoggingLevel::Path,
            engine_host: "127.0.0.1".to_string(),
            engine_port: 1234,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub control: ControlPortSettings,
    /// HTTP ingestion endpoint, preferred for clip delivery when present.
    pub ingest_url: Option<String>,
    pub ingest_slot: String,
    pub ingest_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub tick: Duration,
    pub staleness_cap: Duration,
    pub upcoming_limit: usize,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(3),
            staleness_cap: Duration::from_secs(30),
            upcoming_limit: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DjSettings {
    pub delay: Duration,
    pub probability: f64,
    pub guardrails: TextGuardrails,
    pub pipeline: DjPipelineSettings,
}

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub history_keep: usize,
    pub artifact_gc_age: Duration,
    pub artwork_cache_cap_bytes: i64,
    pub housekeeping_interval: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            history_keep: 5000,
            artifact_gc_age: Duration::from_secs(24 * 60 * 60),
            artwork_cache_cap_bytes: 100 * 1024 * 1024,
            housekeeping_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmTierSettings {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_command: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
    pub retries: u32,
    pub rate_limit_delay: Duration,
    pub templates: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TtsTierSettings {
    pub provider: String,
    pub name: String,
    pub base_url: String,
    pub command: Vec<String>,
    pub timeout: Duration,
    pub retries: u32,
    pub rate_limit_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub tts_dir: PathBuf,
    pub artwork_cache_dir: PathBuf,
    pub frontend_dir_path: Option<String>,
    pub logging_level: RequestsLoggingLevel,
    pub startup_grace: Duration,
    pub ffmpeg_path: String,
    /// Cover-art lookups may only open files under these directories.
    /// Empty means file-based cover lookups are disabled.
    pub music_roots: Vec<PathBuf>,
    pub engine: EngineSettings,
    pub snapshot: SnapshotSettings,
    pub dj: DjSettings,
    pub retention: RetentionSettings,
    pub llm_tiers: Vec<LlmTierSettings>,
    pub tts_tiers: Vec<TtsTierSettings>,
}

fn resolve_api_key(tier: &LlmTierConfig) -> Option<String> {
    if tier.api_key.is_some() {
        return tier.api_key.clone();
    }
    let env_name = tier
        .api_key_env
        .clone()
        .unwrap_or_else(|| DEFAULT_LLM_API_KEY_ENV.to_string());
    std::env::var(env_name).ok().filter(|key| !key.is_empty())
}

fn default_llm_tiers() -> Vec<LlmTierSettings> {
    vec![
        LlmTierSettings {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            api_key_command: None,
            temperature: 0.7,
            timeout: Duration::from_secs(20),
            retries: 0,
            rate_limit_delay: Duration::from_secs(2),
            templates: Vec::new(),
        },
        LlmTierSettings {
            provider: "template".to_string(),
            base_url: String::new(),
            model: String::new(),
            api_key: None,
            api_key_command: None,
            temperature: 0.0,
            timeout: Duration::from_secs(1),
            retries: 0,
            rate_limit_delay: Duration::from_secs(1),
            templates: Vec::new(),
        },
    ]
}

fn default_tts_tiers() -> Vec<TtsTierSettings> {
    vec![
        TtsTierSettings {
            provider: "http".to_string(),
            name: "xtts".to_string(),
            base_url: "http://localhost:8020".to_string(),
            command: Vec::new(),
            timeout: Duration::from_secs(60),
            retries: 0,
            rate_limit_delay: Duration::from_secs(2),
        },
        TtsTierSettings {
            provider: "command".to_string(),
            name: "command".to_string(),
            base_url: String::new(),
            command: Vec::new(),
            timeout: Duration::from_secs(60),
            retries: 0,
            rate_limit_delay: Duration::from_secs(1),
        },
    ]
}

impl AppConfig {
    /// Resolve the final configuration. File values override CLI values.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in the config file")
            })?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let tts_dir = file
            .tts_dir
            .map(PathBuf::from)
            .or_else(|| cli.tts_dir.clone())
            .unwrap_or_else(|| db_path.parent().unwrap_or(&db_path).join("tts"));

        let artwork_cache_dir = file
            .artwork_cache_dir
            .map(PathBuf::from)
            .or_else(|| cli.artwork_cache_dir.clone())
            .unwrap_or_else(|| db_path.parent().unwrap_or(&db_path).join("covers"));

        let host = file.host.unwrap_or_else(|| cli.host.clone());
        let port = file.port.unwrap_or(cli.port);
        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());
        let logging_level = file
            .logging_level
            .and_then(|s| RequestsLoggingLevel::from_str(&s, true).ok())
            .unwrap_or_else(|| cli.logging_level.clone());
        let startup_grace = Duration::from_secs(file.startup_grace_secs.unwrap_or(15));
        let ffmpeg_path = file.ffmpeg_path.unwrap_or_else(|| "ffmpeg".to_string());

        let music_roots: Vec<PathBuf> = file
            .music_roots
            .map(|roots| roots.into_iter().map(PathBuf::from).collect())
            .unwrap_or_else(|| cli.music_roots.clone());
        for root in &music_roots {
            if !root.is_absolute() {
                bail!("music root must be an absolute path: {:?}", root);
            }
        }

        let engine_file = file.engine.unwrap_or_default();
        let control_defaults = ControlPortSettings::default();
        let engine = EngineSettings {
            control: ControlPortSettings {
                host: engine_file.host.unwrap_or_else(|| cli.engine_host.clone()),
                port: engine_file.port.unwrap_or(cli.engine_port),
                queue_name: engine_file
                    .queue_name
                    .unwrap_or(control_defaults.queue_name),
                output_name: engine_file
                    .output_name
                    .unwrap_or(control_defaults.output_name),
                command_timeout: engine_file
                    .command_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(control_defaults.command_timeout),
                enqueue_timeout: engine_file
                    .enqueue_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(control_defaults.enqueue_timeout),
            },
            ingest_url: engine_file.ingest_url,
            ingest_slot: engine_file.ingest_slot.unwrap_or_else(|| "tts".to_string()),
            ingest_timeout: engine_file
                .ingest_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(3)),
        };

        let snapshot_file = file.snapshot.unwrap_or_default();
        let snapshot_defaults = SnapshotSettings::default();
        let snapshot = SnapshotSettings {
            tick: snapshot_file
                .tick_secs
                .map(Duration::from_secs)
                .unwrap_or(snapshot_defaults.tick),
            staleness_cap: snapshot_file
                .staleness_cap_secs
                .map(Duration::from_secs)
                .unwrap_or(snapshot_defaults.staleness_cap),
            upcoming_limit: snapshot_file
                .upcoming_limit
                .unwrap_or(snapshot_defaults.upcoming_limit),
        };

        let dj_file = file.dj.unwrap_or_default();
        let guardrail_defaults = TextGuardrails::default();
        let guardrails = TextGuardrails {
            min_chars: dj_file.text_min_chars.unwrap_or(guardrail_defaults.min_chars),
            max_chars: dj_file.text_max_chars.unwrap_or(guardrail_defaults.max_chars),
            forbidden_tokens: dj_file
                .forbidden_tokens
                .unwrap_or(guardrail_defaults.forbidden_tokens),
        };
        let pipeline_defaults = DjPipelineSettings::default();
        let pipeline = DjPipelineSettings {
            min_dj_spacing: dj_file
                .min_spacing_secs
                .map(Duration::from_secs)
                .unwrap_or(pipeline_defaults.min_dj_spacing),
            min_audio_bytes: dj_file
                .min_audio_bytes
                .unwrap_or(pipeline_defaults.min_audio_bytes),
            tts_dir: tts_dir.clone(),
            voice: dj_file.voice.unwrap_or(pipeline_defaults.voice),
            language: dj_file.language.unwrap_or(pipeline_defaults.language),
            style_hints: dj_file.style_hints.unwrap_or(pipeline_defaults.style_hints),
            intro_prompt: dj_file
                .intro_prompt
                .unwrap_or(pipeline_defaults.intro_prompt),
            outro_prompt: dj_file
                .outro_prompt
                .unwrap_or(pipeline_defaults.outro_prompt),
            enqueue_retries: pipeline_defaults.enqueue_retries,
            enqueue_backoff: pipeline_defaults.enqueue_backoff,
            clip_artist: dj_file.clip_artist.unwrap_or(pipeline_defaults.clip_artist),
            clip_album: dj_file.clip_album.unwrap_or(pipeline_defaults.clip_album),
        };
        let probability = dj_file.probability.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&probability) {
            bail!("dj.probability must be within [0, 1], got {}", probability);
        }
        let dj = DjSettings {
            delay: dj_file
                .delay_secs
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30)),
            probability,
            guardrails,
            pipeline,
        };

        let retention_file = file.retention.unwrap_or_default();
        let retention_defaults = RetentionSettings::default();
        let retention = RetentionSettings {
            history_keep: retention_file
                .history_keep
                .unwrap_or(retention_defaults.history_keep),
            artifact_gc_age: retention_file
                .artifact_gc_age_hours
                .map(|h| Duration::from_secs(h * 60 * 60))
                .unwrap_or(retention_defaults.artifact_gc_age),
            artwork_cache_cap_bytes: retention_file
                .artwork_cache_cap_mb
                .map(|mb| (mb * 1024 * 1024) as i64)
                .unwrap_or(retention_defaults.artwork_cache_cap_bytes),
            housekeeping_interval: retention_file
                .housekeeping_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(retention_defaults.housekeeping_interval),
        };

        let llm_tiers = if file.llm_tiers.is_empty() {
            default_llm_tiers()
        } else {
            file.llm_tiers
                .iter()
                .map(|tier| {
                    let known = ["openai", "ollama", "template"];
                    if !known.contains(&tier.provider.as_str()) {
                        bail!("unknown llm provider \"{}\"", tier.provider);
                    }
                    Ok(LlmTierSettings {
                        provider: tier.provider.clone(),
                        base_url: tier.base_url.clone().unwrap_or_default(),
                        model: tier.model.clone().unwrap_or_default(),
                        api_key: resolve_api_key(tier),
                        api_key_command: tier.api_key_command.clone(),
                        temperature: tier.temperature.unwrap_or(0.7),
                        timeout: Duration::from_secs(tier.timeout_secs.unwrap_or(20)),
                        retries: tier.retries.unwrap_or(0),
                        rate_limit_delay: Duration::from_secs(
                            tier.rate_limit_delay_secs.unwrap_or(2),
                        ),
                        templates: tier.templates.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let tts_tiers = if file.tts_tiers.is_empty() {
            default_tts_tiers()
        } else {
            file.tts_tiers
                .iter()
                .map(|tier| {
                    let known = ["http", "command"];
                    if !known.contains(&tier.provider.as_str()) {
                        bail!("unknown tts provider \"{}\"", tier.provider);
                    }
                    Ok(TtsTierSettings {
                        provider: tier.provider.clone(),
                        name: tier
                            .name
                            .clone()
                            .unwrap_or_else(|| tier.provider.clone()),
                        base_url: tier.base_url.clone().unwrap_or_default(),
                        command: tier.command.clone(),
                        timeout: Duration::from_secs(tier.timeout_secs.unwrap_or(60)),
                        retries: tier.retries.unwrap_or(0),
                        rate_limit_delay: Duration::from_secs(
                            tier.rate_limit_delay_secs.unwrap_or(2),
                        ),
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            host,
            port,
            db_path,
            tts_dir,
            artwork_cache_dir,
            frontend_dir_path,
            logging_level,
            startup_grace,
            ffmpeg_path,
            music_roots,
            engine,
            snapshot,
            dj,
            retention,
            llm_tiers,
            tts_tiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with_db(tmp: &TempDir) -> CliConfig {
        CliConfig {
            db_path: Some(tmp.path().join("radio.db")),
            ..Default::default()
        }
    }

    #[test]
    fn resolve_cli_only_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_db(&tmp), None).unwrap();

        assert_eq!(config.port, 5055);
        assert_eq!(config.engine.control.port, 1234);
        assert_eq!(config.snapshot.tick, Duration::from_secs(3));
        assert_eq!(config.dj.delay, Duration::from_secs(30));
        assert_eq!(config.retention.history_keep, 5000);
        // Default tier ladders end in the never-fail providers.
        assert_eq!(config.llm_tiers.last().unwrap().provider, "template");
        assert_eq!(config.tts_tiers.last().unwrap().provider, "command");
        // Derived paths live next to the database.
        assert!(config.tts_dir.ends_with("tts"));
        assert!(config.artwork_cache_dir.ends_with("covers"));
    }

    #[test]
    fn file_overrides_cli() {
        let tmp = TempDir::new().unwrap();
        let file = FileConfig {
            port: Some(8080),
            db_path: Some(tmp.path().join("other.db").to_string_lossy().to_string()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli_with_db(&tmp), Some(file)).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.db_path.ends_with("other.db"));
    }

    #[test]
    fn missing_db_path_is_a_config_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_path must be specified"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = FileConfig {
            llm_tiers: vec![LlmTierConfig {
                provider: "quantum".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_db(&tmp), Some(file)).is_err());
    }

    #[test]
    fn music_roots_resolve_and_must_be_absolute() {
        let tmp = TempDir::new().unwrap();
        let file = FileConfig {
            music_roots: Some(vec!["/mnt/music".to_string(), "/srv/radio".to_string()]),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli_with_db(&tmp), Some(file)).unwrap();
        assert_eq!(
            config.music_roots,
            vec![PathBuf::from("/mnt/music"), PathBuf::from("/srv/radio")]
        );

        let file = FileConfig {
            music_roots: Some(vec!["relative/music".to_string()]),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_db(&tmp), Some(file)).is_err());
    }

    #[test]
    fn music_roots_default_to_empty() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_db(&tmp), None).unwrap();
        assert!(config.music_roots.is_empty());
    }

    #[test]
    fn probability_is_validated() {
        let tmp = TempDir::new().unwrap();
        let file = FileConfig {
            dj: Some(DjConfig {
                probability: Some(1.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_db(&tmp), Some(file)).is_err());
    }

    #[test]
    fn api_key_env_override_is_applied() {
        let tmp = TempDir::new().unwrap();
        std::env::set_var("TEST_RADIO_KEY_XYZ", "sk-secret");
        let file = FileConfig {
            llm_tiers: vec![LlmTierConfig {
                provider: "openai".to_string(),
                base_url: Some("https://api.example.com/v1".to_string()),
                model: Some("gpt-test".to_string()),
                api_key_env: Some("TEST_RADIO_KEY_XYZ".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli_with_db(&tmp), Some(file)).unwrap();
        assert_eq!(config.llm_tiers[0].api_key.as_deref(), Some("sk-secret"));
        std::env::remove_var("TEST_RADIO_KEY_XYZ");
    }
}
