//! Metadata cache: the only poller of the engine for presentation state.
//!
//! A single daemon task refreshes Now/Next snapshots on a fixed tick and
//! owns them behind this cache. Everything else (HTTP handlers, the DJ
//! pipeline, WS fan-out) reads from here instead of opening its own engine
//! connection.

use crate::engine::{EngineAdapter, EngineError, EngineNow, TrackRef};
use crate::now_ms;
use crate::store::RadioStore;
use serde::Serialize;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_TICK: Duration = Duration::from_secs(3);
pub const DEFAULT_STALENESS_CAP: Duration = Duration::from_secs(30);
pub const DEFAULT_UPCOMING_LIMIT: usize = 8;

/// Current-track view served to clients.
///
/// `track_started_at_ms` is stable across refreshes that do not observe a
/// track change, so client progress bars survive reloads.
#[derive(Debug, Clone, Serialize)]
pub struct NowSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub track_started_at_ms: i64,
    pub captured_at_ms: i64,
}

/// One upcoming queue entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NextEntry {
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_ref: Option<String>,
}

/// A track change observed by the poller.
#[derive(Debug, Clone)]
pub struct ObservedChange {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub source_uri: Option<String>,
}

struct Inner {
    now: Option<NowSnapshot>,
    next: Vec<NextEntry>,
    last_success_ms: i64,
}

pub struct SnapshotCache {
    inner: RwLock<Inner>,
    staleness_cap: Duration,
    upcoming_limit: usize,
}

impl SnapshotCache {
    pub fn new(staleness_cap: Duration, upcoming_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                now: None,
                next: Vec::new(),
                last_success_ms: 0,
            }),
            staleness_cap,
            upcoming_limit,
        }
    }

    pub fn upcoming_limit(&self) -> usize {
        self.upcoming_limit
    }

    pub fn now(&self) -> Option<NowSnapshot> {
        self.inner.read().unwrap().now.clone()
    }

    pub fn next(&self, limit: usize) -> Vec<NextEntry> {
        let inner = self.inner.read().unwrap();
        inner
            .next
            .iter()
            .take(limit.min(self.upcoming_limit))
            .cloned()
            .collect()
    }

    /// First predicted upcoming track, for arming DJ intros.
    pub fn predicted_next(&self) -> Option<NextEntry> {
        self.inner.read().unwrap().next.first().cloned()
    }

    /// True once the last successful engine read is older than the
    /// staleness cap. Clears on the next successful read.
    pub fn is_stale(&self) -> bool {
        let last_success = self.inner.read().unwrap().last_success_ms;
        if last_success == 0 {
            return true;
        }
        now_ms() - last_success > self.staleness_cap.as_millis() as i64
    }

    /// Record a successful engine read that carried no track fields
    /// (between tracks); the snapshot is kept but no longer ages.
    pub fn note_success(&self) {
        self.inner.write().unwrap().last_success_ms = now_ms();
    }

    /// Fold a fresh engine read into the cache. Returns the change when the
    /// observed `(title, artist)` differs from the previous snapshot.
    pub fn observe_now(&self, observed: &EngineNow) -> Option<ObservedChange> {
        let captured_at = now_ms();
        let mut inner = self.inner.write().unwrap();
        inner.last_success_ms = captured_at;

        let unchanged = inner
            .now
            .as_ref()
            .map(|prev| prev.title == observed.title && prev.artist == observed.artist)
            .unwrap_or(false);

        if unchanged {
            let prev = inner.now.as_mut().expect("checked above");
            prev.captured_at_ms = captured_at;
            prev.album = observed.album.clone();
            if prev.duration_ms.is_none() {
                prev.duration_ms = observed.duration_ms;
            }
            return None;
        }

        // New track: anchor its start time, using the engine's timing when
        // it reports both duration and remaining.
        let track_started_at_ms = match (observed.duration_ms, observed.remaining_ms) {
            (Some(duration), Some(remaining)) if duration >= remaining => {
                captured_at - (duration - remaining)
            }
            _ => captured_at,
        };

        inner.now = Some(NowSnapshot {
            title: observed.title.clone(),
            artist: observed.artist.clone(),
            album: observed.album.clone(),
            source_uri: observed.source_uri.clone(),
            artwork_ref: observed
                .source_uri
                .as_deref()
                .map(crate::artwork::cover_url_for_file),
            duration_ms: observed.duration_ms,
            track_started_at_ms,
            captured_at_ms: captured_at,
        });

        Some(ObservedChange {
            title: observed.title.clone(),
            artist: observed.artist.clone(),
            album: observed.album.clone(),
            source_uri: observed.source_uri.clone(),
        })
    }

    pub fn set_next(&self, entries: Vec<NextEntry>) {
        self.inner.write().unwrap().next = entries;
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS_CAP, DEFAULT_UPCOMING_LIMIT)
    }
}

/// Turn engine queue entries into presentation entries, resolving artwork
/// references. This path only reads the store: entries without a file are
/// resolved through play history, falling back to an artist/album lookup
/// URL the cover endpoint can serve on demand.
pub fn enrich_upcoming(store: &dyn RadioStore, upcoming: Vec<TrackRef>) -> Vec<NextEntry> {
    upcoming
        .into_iter()
        .map(|track| {
            let artwork_ref = match &track.source_uri {
                Some(uri) => Some(crate::artwork::cover_url_for_file(uri)),
                None if !track.artist.is_empty() => {
                    match store.lookup_album_file(&track.artist, &track.album) {
                        Ok(Some(file)) => Some(crate::artwork::cover_url_for_file(&file)),
                        _ => Some(crate::artwork::cover_url_for_album(
                            &track.artist,
                            &track.album,
                        )),
                    }
                }
                None => None,
            };
            NextEntry {
                title: track.title,
                artist: track.artist,
                album: track.album,
                source_uri: track.source_uri,
                artwork_ref,
            }
        })
        .collect()
}

/// The poller daemon. On each tick it reads Now/Next through the engine
/// adapter; observed track changes are routed through ingest as a backstop
/// (the engine webhook is the primary path, the dedup window reconciles the
/// two).
pub async fn run_metadata_daemon(
    cache: Arc<SnapshotCache>,
    engine: Arc<dyn EngineAdapter>,
    store: Arc<dyn RadioStore>,
    ingest: Arc<crate::ingest::IngestService>,
    tick: Duration,
    shutdown: CancellationToken,
) {
    info!("Metadata daemon started (tick {:?})", tick);
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        match engine.now().await {
            Ok(observed) if !observed.title.is_empty() || !observed.artist.is_empty() => {
                if let Some(change) = cache.observe_now(&observed) {
                    debug!(title = %change.title, artist = %change.artist, "Poller observed track change");
                    ingest.ingest_observed_change(&change);
                }
            }
            Ok(_) => {
                // Engine reachable but between tracks; keep the snapshot.
                cache.note_success();
            }
            Err(EngineError::Unavailable(reason)) => {
                debug!(reason = %reason, "Engine read failed, snapshots aging");
            }
            Err(e) => {
                warn!(error = %e, "Engine read failed");
            }
        }

        match engine.upcoming(cache.upcoming_limit()).await {
            Ok(upcoming) => {
                cache.set_next(enrich_upcoming(store.as_ref(), upcoming));
            }
            Err(e) => {
                debug!(error = %e, "Upcoming read failed, keeping previous queue view");
            }
        }
    }
    info!("Metadata daemon stopped");
}
