//! Durable storage: play history, TTS artifact registry and artwork cache.

mod error;
mod models;
mod schema;
mod sqlite_store;
mod trait_def;

pub use error::StoreError;
pub use models::{
    ArtworkEntry, EventKind, HistoryEntry, NewPlayEvent, NewTtsArtifact, PlayEvent, StoreStats,
    TtsArtifact, TtsMode, TtsStatus,
};
pub use sqlite_store::SqliteRadioStore;
pub use trait_def::{RadioStore, DEDUP_WINDOW_MS};
