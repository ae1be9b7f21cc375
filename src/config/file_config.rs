//! TOML file configuration. Every field is optional; values present in the
//! file override CLI arguments during resolution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<String>,
    pub tts_dir: Option<String>,
    pub artwork_cache_dir: Option<String>,
    pub frontend_dir_path: Option<String>,
    pub logging_level: Option<String>,
    pub startup_grace_secs: Option<u64>,
    pub ffmpeg_path: Option<String>,
    /// Directories cover-art lookups are allowed to read audio files from.
    pub music_roots: Option<Vec<String>>,

    pub engine: Option<EngineConfig>,
    pub snapshot: Option<SnapshotConfig>,
    pub dj: Option<DjConfig>,
    pub retention: Option<RetentionConfig>,
    #[serde(default)]
    pub llm_tiers: Vec<LlmTierConfig>,
    #[serde(default)]
    pub tts_tiers: Vec<TtsTierConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse config file {:?}", path))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub queue_name: Option<String>,
    pub output_name: Option<String>,
    pub command_timeout_ms: Option<u64>,
    pub enqueue_timeout_ms: Option<u64>,
    /// When set, clips are shipped over HTTP PUT instead of the control
    /// port.
    pub ingest_url: Option<String>,
    pub ingest_slot: Option<String>,
    pub ingest_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    pub tick_secs: Option<u64>,
    pub staleness_cap_secs: Option<u64>,
    pub upcoming_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DjConfig {
    pub delay_secs: Option<u64>,
    pub min_spacing_secs: Option<u64>,
    pub probability: Option<f64>,
    pub text_min_chars: Option<usize>,
    pub text_max_chars: Option<usize>,
    pub forbidden_tokens: Option<Vec<String>>,
    pub style_hints: Option<Vec<String>>,
    pub intro_prompt: Option<String>,
    pub outro_prompt: Option<String>,
    pub voice: Option<String>,
    pub language: Option<String>,
    pub min_audio_bytes: Option<u64>,
    pub clip_artist: Option<String>,
    pub clip_album: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    pub history_keep: Option<usize>,
    pub artifact_gc_age_hours: Option<u64>,
    pub artwork_cache_cap_mb: Option<u64>,
    pub housekeeping_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmTierConfig {
    /// "openai", "ollama" or "template".
    pub provider: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Environment variable holding the API key (secrets stay out of the
    /// config file).
    pub api_key_env: Option<String>,
    /// Shell command printing the API key (for rotating tokens).
    pub api_key_command: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub rate_limit_delay_secs: Option<u64>,
    #[serde(default)]
    pub templates: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TtsTierConfig {
    /// "http" or "command".
    pub provider: String,
    pub name: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub rate_limit_delay_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let raw = r#"
            port = 5055
            db_path = "/var/lib/radio/radio.db"
            tts_dir = "/var/lib/radio/tts"
            music_roots = ["/mnt/music", "/mnt/music/media"]

            [engine]
            host = "127.0.0.1"
            port = 1234
            queue_name = "tts"

            [snapshot]
            tick_secs = 3

            [dj]
            delay_secs = 30
            forbidden_tokens = ["ai", "robot"]

            [retention]
            history_keep = 5000

            [[llm_tiers]]
            provider = "ollama"
            base_url = "http://localhost:11434"
            model = "llama3.1:8b"

            [[llm_tiers]]
            provider = "template"

            [[tts_tiers]]
            provider = "http"
            base_url = "http://localhost:8020"
        "#;
        let config: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.port, Some(5055));
        assert_eq!(config.music_roots.as_ref().unwrap().len(), 2);
        assert_eq!(config.engine.unwrap().queue_name.as_deref(), Some("tts"));
        assert_eq!(config.llm_tiers.len(), 2);
        assert_eq!(config.llm_tiers[1].provider, "template");
        assert_eq!(config.tts_tiers.len(), 1);
        assert_eq!(
            config.dj.unwrap().forbidden_tokens.unwrap(),
            vec!["ai", "robot"]
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = "not_a_real_field = 1";
        assert!(toml::from_str::<FileConfig>(raw).is_err());
    }

    #[test]
    fn empty_config_is_valid() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.port.is_none());
        assert!(config.llm_tiers.is_empty());
    }
}
