//! Store trait definition.

use super::error::StoreError;
use super::models::{
    ArtworkEntry, EventKind, HistoryEntry, NewPlayEvent, NewTtsArtifact, PlayEvent, StoreStats,
    TtsArtifact, TtsStatus,
};

/// Two events of the same kind/title/artist closer together than this are
/// considered the same event.
pub const DEDUP_WINDOW_MS: i64 = 10_000;

/// Durable, transactional storage for play events, TTS artifacts and the
/// artwork cache. All multi-row operations are atomic; history reads never
/// block writers (WAL).
pub trait RadioStore: Send + Sync {
    /// Append a play event. Rejects with [`StoreError::DuplicateEvent`] when
    /// an event with the same `(kind, title, artist)` exists within the
    /// dedup window around `epoch_ms`.
    fn commit_play_event(&self, event: &NewPlayEvent) -> Result<i64, StoreError>;

    /// Append a play event and set its artifact reference in one
    /// transaction. The artifact must be `ready`.
    fn commit_and_link(&self, event: &NewPlayEvent, tts_id: i64) -> Result<i64, StoreError>;

    /// Find the event a duplicate commit collided with, for idempotent
    /// producer retries.
    fn lookup_by_dedup(
        &self,
        kind: EventKind,
        title: &str,
        artist: &str,
        epoch_ms: i64,
    ) -> Result<Option<PlayEvent>, StoreError>;

    /// Point an existing event at a `ready` artifact.
    fn link_tts(&self, event_id: i64, tts_id: i64) -> Result<(), StoreError>;

    /// Register a new artifact in `pending`.
    fn register_tts(&self, artifact: &NewTtsArtifact) -> Result<i64, StoreError>;

    /// Advance an artifact's status. Only `pending -> ready|failed` and
    /// `ready -> garbage` are legal.
    fn mark_tts(
        &self,
        id: i64,
        status: TtsStatus,
        size_bytes: Option<i64>,
        duration_ms: Option<i64>,
    ) -> Result<(), StoreError>;

    fn get_tts(&self, id: i64) -> Result<Option<TtsArtifact>, StoreError>;

    /// Find an artifact by its audio file path (used to link engine-reported
    /// DJ events back to the clip that produced them).
    fn find_tts_by_audio_path(&self, path: &str) -> Result<Option<TtsArtifact>, StoreError>;

    /// History rows descending by id, optionally only ids below `before`.
    /// DJ rows carry the linked artifact's text/audio only while the
    /// artifact is `ready`.
    fn history(&self, limit: usize, before: Option<i64>) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Most recent `dj` event at or after `epoch_ms`, if any. Drives the
    /// pipeline's minimum-spacing gate.
    fn latest_dj_event_since(&self, epoch_ms: i64) -> Result<Option<PlayEvent>, StoreError>;

    /// Latest song event matching artist/title, case-insensitive.
    fn lookup_track(&self, artist: &str, title: &str) -> Result<Option<PlayEvent>, StoreError>;

    /// Latest known audio file for an artist/album pair, from play history.
    fn lookup_album_file(&self, artist: &str, album: &str) -> Result<Option<String>, StoreError>;

    /// Startup sweeper: any artifact still `pending` from a previous run is
    /// moved to `failed`. Returns the number of rows swept.
    fn sweep_pending_tts(&self) -> Result<usize, StoreError>;

    /// Drop history rows beyond the newest `keep_last`. Returns rows removed.
    fn prune_history(&self, keep_last: usize) -> Result<usize, StoreError>;

    /// Delete `failed`/`garbage` artifacts older than the given timestamp and
    /// return them so the caller can remove their files. Event references are
    /// nulled by the schema's ON DELETE SET NULL.
    fn reap_dead_tts(&self, older_than_ms: i64) -> Result<Vec<TtsArtifact>, StoreError>;

    fn put_artwork(&self, entry: &ArtworkEntry) -> Result<(), StoreError>;

    fn get_artwork(&self, key: &str) -> Result<Option<ArtworkEntry>, StoreError>;

    /// Refresh `last_used_at` so the entry survives LRU eviction.
    fn touch_artwork(&self, key: &str) -> Result<(), StoreError>;

    /// Evict least-recently-used artwork rows until the cache fits under
    /// `cap_bytes`; returns the evicted entries for file cleanup.
    fn evict_artwork_over(&self, cap_bytes: i64) -> Result<Vec<ArtworkEntry>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;
}
