//! In-process publish/subscribe fan-out for presentation state.
//!
//! Three topics: track changes, history appends and DJ pipeline state.
//! Buffers are bounded; a slow subscriber loses the oldest messages and can
//! observe how many it lost (surfaced to WS clients as a `lag_hint`).
//! Publishers never block, and delivery is best-effort: the store remains
//! the ordered source of truth.

use crate::store::{EventKind, HistoryEntry};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_TOPIC_CAPACITY: usize = 32;

/// Emitted when the currently playing track changes.
#[derive(Debug, Clone, Serialize)]
pub struct TrackChanged {
    pub kind: EventKind,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_ref: Option<String>,
    pub epoch_ms: i64,
}

/// Emitted on every DJ job state transition.
#[derive(Debug, Clone, Serialize)]
pub struct DjState {
    pub dedup_key: String,
    pub state: String,
    pub track_title: String,
    pub track_artist: String,
    pub epoch_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct RadioBus {
    track_tx: broadcast::Sender<TrackChanged>,
    history_tx: broadcast::Sender<HistoryEntry>,
    dj_tx: broadcast::Sender<DjState>,
    dropped: AtomicU64,
}

impl RadioBus {
    pub fn new(capacity: usize) -> Self {
        let (track_tx, _) = broadcast::channel(capacity);
        let (history_tx, _) = broadcast::channel(capacity);
        let (dj_tx, _) = broadcast::channel(capacity);
        Self {
            track_tx,
            history_tx,
            dj_tx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn publish_track_changed(&self, event: TrackChanged) {
        let _ = self.track_tx.send(event);
    }

    pub fn publish_history_appended(&self, entry: HistoryEntry) {
        let _ = self.history_tx.send(entry);
    }

    pub fn publish_dj_state(&self, state: DjState) {
        let _ = self.dj_tx.send(state);
    }

    pub fn subscribe_track_changed(&self) -> broadcast::Receiver<TrackChanged> {
        self.track_tx.subscribe()
    }

    pub fn subscribe_history_appended(&self) -> broadcast::Receiver<HistoryEntry> {
        self.history_tx.subscribe()
    }

    pub fn subscribe_dj_state(&self) -> broadcast::Receiver<DjState> {
        self.dj_tx.subscribe()
    }

    /// Record frames a lagging subscriber had to drop.
    pub fn note_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for RadioBus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}
