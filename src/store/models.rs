//! Persisted entities: play events, TTS artifacts and artwork cache rows.

use serde::{Deserialize, Serialize};

/// Kind of a play event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Song,
    Dj,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Song => "song",
            EventKind::Dj => "dj",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "song" => Some(EventKind::Song),
            "dj" => Some(EventKind::Dj),
            _ => None,
        }
    }
}

/// An append-only play history row. Never mutated after commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayEvent {
    pub id: i64,
    pub kind: EventKind,
    pub epoch_ms: i64,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// A play event about to be committed; the store assigns the id.
#[derive(Debug, Clone, Default)]
pub struct NewPlayEvent {
    pub kind: Option<EventKind>,
    pub epoch_ms: i64,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub source_uri: Option<String>,
    pub artwork_ref: Option<String>,
    pub extra: Option<serde_json::Value>,
}

impl NewPlayEvent {
    pub fn kind(&self) -> EventKind {
        self.kind.unwrap_or(EventKind::Song)
    }
}

/// A history row as served to clients: the event plus, for `dj` rows,
/// the spoken text and audio path of the linked ready artifact.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub event: PlayEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_audio_path: Option<String>,
}

/// Generation mode of a TTS clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsMode {
    Intro,
    Outro,
    Custom,
}

impl TtsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtsMode::Intro => "intro",
            TtsMode::Outro => "outro",
            TtsMode::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "intro" => Some(TtsMode::Intro),
            "outro" => Some(TtsMode::Outro),
            "custom" => Some(TtsMode::Custom),
            _ => None,
        }
    }
}

/// Lifecycle status of a TTS artifact.
///
/// Legal transitions: `pending -> ready`, `pending -> failed`,
/// `ready -> garbage`. Everything else is rejected by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsStatus {
    Pending,
    Ready,
    Failed,
    Garbage,
}

impl TtsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtsStatus::Pending => "pending",
            TtsStatus::Ready => "ready",
            TtsStatus::Failed => "failed",
            TtsStatus::Garbage => "garbage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TtsStatus::Pending),
            "ready" => Some(TtsStatus::Ready),
            "failed" => Some(TtsStatus::Failed),
            "garbage" => Some(TtsStatus::Garbage),
            _ => None,
        }
    }
}

impl std::fmt::Display for TtsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A synthesized DJ clip on disk plus its transcript sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct TtsArtifact {
    pub id: i64,
    pub epoch_ms: i64,
    pub text: String,
    pub audio_path: String,
    pub transcript_path: String,
    pub track_title: Option<String>,
    pub track_artist: Option<String>,
    pub mode: TtsMode,
    pub voice: Option<String>,
    pub status: TtsStatus,
    pub size_bytes: Option<i64>,
    pub duration_ms: Option<i64>,
}

/// A TTS artifact about to be registered; starts in `pending`.
#[derive(Debug, Clone)]
pub struct NewTtsArtifact {
    pub epoch_ms: i64,
    pub text: String,
    pub audio_path: String,
    pub transcript_path: String,
    pub track_title: Option<String>,
    pub track_artist: Option<String>,
    pub mode: TtsMode,
    pub voice: Option<String>,
}

/// A cached cover-art file, LRU-evicted above the configured cap.
#[derive(Debug, Clone, Serialize)]
pub struct ArtworkEntry {
    pub key: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub source_uri: Option<String>,
    pub local_path: String,
    pub size_bytes: i64,
    pub cached_at: i64,
    pub last_used_at: i64,
}

/// Station statistics for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub song_events: usize,
    pub dj_events: usize,
    pub ready_artifacts: usize,
    pub total_artifacts: usize,
    pub artwork_entries: usize,
    pub artwork_bytes: i64,
    pub events_last_24h: usize,
}
