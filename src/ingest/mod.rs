//! Track-event ingest: normalize, dedup-commit, broadcast, arm the DJ.
//!
//! Events arrive from the engine's track-change webhook and from the
//! metadata poller's change detection (backstop). The store's dedup window
//! reconciles the two paths; broadcasts happen only after a commit
//! succeeds, so subscribers never see an unpersisted event.

use crate::bus::{RadioBus, TrackChanged};
use crate::dj::{DjJobSpec, DjPipeline};
use crate::now_ms;
use crate::scheduler::TimerWheel;
use crate::snapshot::{ObservedChange, SnapshotCache};
use crate::store::{
    EventKind, HistoryEntry, NewPlayEvent, PlayEvent, RadioStore, StoreError, TtsStatus,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

pub const MAX_FIELD_CHARS: usize = 512;

/// Accepted epoch skew before the server substitutes its own clock.
pub const EPOCH_TOLERANCE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Delay between a song starting and its successor's intro being armed.
    pub dj_delay: Duration,
    /// Chance of arming an intro for any given track.
    pub dj_probability: f64,
    /// Intros are skipped for this artist (the station's own persona).
    pub dj_persona: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            dj_delay: Duration::from_secs(30),
            dj_probability: 1.0,
            dj_persona: "AI DJ".to_string(),
        }
    }
}

/// An event as received off the wire, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawTrackEvent {
    pub kind: Option<EventKind>,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub source_uri: Option<String>,
    pub epoch_ms: Option<i64>,
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Committed { id: i64 },
    Deduped { existing_id: i64 },
}

/// NFC-normalize, trim and cap a metadata string.
pub fn normalize_text(input: &str, max_chars: usize) -> String {
    let normalized: String = input.nfc().collect();
    normalized.trim().chars().take(max_chars).collect()
}

/// Use the client epoch only when it is plausibly recent.
pub fn clamp_epoch(epoch_ms: Option<i64>, now_ms: i64, tolerance: Duration) -> i64 {
    match epoch_ms {
        Some(epoch) if (now_ms - epoch).unsigned_abs() <= tolerance.as_millis() as u64 => epoch,
        _ => now_ms,
    }
}

pub struct IngestService {
    store: Arc<dyn RadioStore>,
    bus: Arc<RadioBus>,
    snapshots: Arc<SnapshotCache>,
    pipeline: Arc<DjPipeline>,
    timers: TimerWheel<DjJobSpec>,
    settings: IngestSettings,
    last_armed: Mutex<Option<String>>,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn RadioStore>,
        bus: Arc<RadioBus>,
        snapshots: Arc<SnapshotCache>,
        pipeline: Arc<DjPipeline>,
        timers: TimerWheel<DjJobSpec>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            bus,
            snapshots,
            pipeline,
            timers,
            settings,
            last_armed: Mutex::new(None),
        }
    }

    /// Ingest one event end to end. Duplicates are reported, not errors.
    pub fn ingest(&self, raw: RawTrackEvent) -> Result<IngestOutcome, StoreError> {
        let now = now_ms();
        let event = NewPlayEvent {
            kind: raw.kind,
            epoch_ms: clamp_epoch(raw.epoch_ms, now, EPOCH_TOLERANCE),
            title: normalize_text(&raw.title, MAX_FIELD_CHARS),
            artist: normalize_text(&raw.artist, MAX_FIELD_CHARS),
            album: normalize_text(&raw.album, MAX_FIELD_CHARS),
            source_uri: raw.source_uri.clone(),
            artwork_ref: raw
                .source_uri
                .as_deref()
                .map(crate::artwork::cover_url_for_file),
            extra: raw.extra,
        };

        // Engine-reported DJ clips link back to the artifact they play.
        let linked_tts = if event.kind() == EventKind::Dj {
            raw.source_uri
                .as_deref()
                .and_then(|uri| self.store.find_tts_by_audio_path(uri).ok().flatten())
                .filter(|artifact| artifact.status == TtsStatus::Ready)
        } else {
            None
        };

        let commit = match &linked_tts {
            Some(artifact) => self.store.commit_and_link(&event, artifact.id),
            None => self.store.commit_play_event(&event),
        };

        let id = match commit {
            Ok(id) => id,
            Err(StoreError::DuplicateEvent { existing_id }) => {
                debug!(existing_id, title = %event.title, "Event deduped");
                return Ok(IngestOutcome::Deduped { existing_id });
            }
            Err(e) => return Err(e),
        };

        info!(id, kind = event.kind().as_str(), title = %event.title, artist = %event.artist, "Play event committed");

        let committed = PlayEvent {
            id,
            kind: event.kind(),
            epoch_ms: event.epoch_ms,
            title: event.title.clone(),
            artist: event.artist.clone(),
            album: event.album.clone(),
            source_uri: event.source_uri.clone(),
            artwork_ref: event.artwork_ref.clone(),
            tts_id: linked_tts.as_ref().map(|a| a.id),
            extra: event.extra.clone(),
        };
        self.bus.publish_history_appended(HistoryEntry {
            event: committed.clone(),
            tts_text: linked_tts.as_ref().map(|a| a.text.clone()),
            tts_audio_path: linked_tts.as_ref().map(|a| a.audio_path.clone()),
        });
        self.bus.publish_track_changed(TrackChanged {
            kind: committed.kind,
            title: committed.title.clone(),
            artist: committed.artist.clone(),
            album: committed.album.clone(),
            artwork_ref: committed.artwork_ref.clone(),
            epoch_ms: committed.epoch_ms,
        });

        if committed.kind == EventKind::Song {
            self.arm_next_intro();
        }

        Ok(IngestOutcome::Committed { id })
    }

    /// Backstop path for the metadata poller's change detection.
    pub fn ingest_observed_change(&self, change: &ObservedChange) {
        let raw = RawTrackEvent {
            kind: Some(EventKind::Song),
            title: change.title.clone(),
            artist: change.artist.clone(),
            album: change.album.clone(),
            source_uri: change.source_uri.clone(),
            epoch_ms: None,
            extra: None,
        };
        match self.ingest(raw) {
            Ok(IngestOutcome::Committed { id }) => {
                debug!(id, "Poller backstop committed a track change");
            }
            Ok(IngestOutcome::Deduped { .. }) => {}
            Err(e) => {
                debug!(error = %e, "Poller backstop ingest failed");
            }
        }
    }

    /// Cancel any armed intro for the previous track and arm one for the
    /// predicted next track.
    fn arm_next_intro(&self) {
        let Some(next) = self.snapshots.predicted_next() else {
            debug!("No predicted next track, not arming an intro");
            return;
        };
        if next.title.is_empty() || next.artist.eq_ignore_ascii_case(&self.settings.dj_persona) {
            return;
        }
        if self.settings.dj_probability < 1.0
            && rand::random::<f64>() >= self.settings.dj_probability
        {
            debug!(title = %next.title, "Intro skipped by probability roll");
            return;
        }

        // Proactive intros target "before the next track", not a known
        // start time.
        let spec = DjJobSpec::intro(&next.title, &next.artist, 0);

        let mut last_armed = self.last_armed.lock().unwrap();
        if let Some(previous) = last_armed.as_ref() {
            if *previous != spec.dedup_key {
                self.timers.cancel(previous);
                self.pipeline.cancel_armed(previous);
            }
        }

        if self.pipeline.try_arm(&spec) {
            debug!(dedup_key = %spec.dedup_key, title = %next.title, "Armed DJ intro");
        }
        // Re-arming a known id just moves its fire time.
        self.timers
            .arm_after(spec.dedup_key.clone(), self.settings.dj_delay, spec.clone());
        *last_armed = Some(spec.dedup_key);
    }
}
