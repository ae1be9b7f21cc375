//! The DJ pipeline: for each upcoming track, at most one intro is
//! generated, synthesized, registered and handed to the engine.
//!
//! One worker drains armed jobs in FIFO order, so at most one job is in
//! flight; idempotence lives in the per-key state map. Text comes from the
//! LLM tiers gated by the guardrails, audio from the TTS tiers gated by
//! file validation.

use super::guardrails::TextGuardrails;
use super::job::{DjJobReport, DjJobSpec, DjJobState, DjStatusBoard};
use crate::bus::{DjState, RadioBus};
use crate::engine::{ClipMetadata, EngineAdapter};
use crate::now_ms;
use crate::providers::llm::LineRequest;
use crate::providers::tts::SynthesisRequest;
use crate::providers::{LlmRegistry, TtsRegistry};
use crate::snapshot::SnapshotCache;
use crate::store::{NewTtsArtifact, RadioStore, TtsMode, TtsStatus};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_STYLE_HINTS: &[&str] = &[
    "keep it upbeat",
    "sound laid back",
    "be a little mysterious",
    "bring high energy",
];

pub const DEFAULT_INTRO_PROMPT: &str = "You are a friendly radio host. In one short sentence, \
     {style}, introduce the song \"{title}\" by {artist}. \
     Mention the artist by name and nothing about yourself.";

pub const DEFAULT_OUTRO_PROMPT: &str = "You are a friendly radio host. In one short sentence, \
     {style}, sign off the song \"{title}\" by {artist} that just played. \
     Mention the artist by name and nothing about yourself.";

#[derive(Debug, Clone)]
pub struct DjPipelineSettings {
    /// No two DJ lines closer together than this.
    pub min_dj_spacing: Duration,
    pub min_audio_bytes: u64,
    pub tts_dir: PathBuf,
    pub voice: String,
    pub language: String,
    pub style_hints: Vec<String>,
    pub intro_prompt: String,
    pub outro_prompt: String,
    pub enqueue_retries: u32,
    pub enqueue_backoff: Duration,
    /// Persona the injected clips play under.
    pub clip_artist: String,
    pub clip_album: String,
}

impl Default for DjPipelineSettings {
    fn default() -> Self {
        Self {
            min_dj_spacing: Duration::from_secs(45),
            min_audio_bytes: 1000,
            tts_dir: PathBuf::from("tts"),
            voice: "en".to_string(),
            language: "en".to_string(),
            style_hints: DEFAULT_STYLE_HINTS.iter().map(|s| s.to_string()).collect(),
            intro_prompt: DEFAULT_INTRO_PROMPT.to_string(),
            outro_prompt: DEFAULT_OUTRO_PROMPT.to_string(),
            enqueue_retries: 3,
            enqueue_backoff: Duration::from_millis(500),
            clip_artist: "AI DJ".to_string(),
            clip_album: "AI Radio".to_string(),
        }
    }
}

/// Clip file sanity: exists, not suspiciously small, looks like audio.
fn validate_clip(path: &Path, min_bytes: u64) -> Result<(), String> {
    let bytes = std::fs::read(path).map_err(|e| format!("clip unreadable: {}", e))?;
    if (bytes.len() as u64) < min_bytes {
        return Err(format!("clip too small: {} bytes", bytes.len()));
    }
    match infer::get(&bytes) {
        Some(kind) if kind.mime_type().starts_with("audio/") => Ok(()),
        Some(kind) => Err(format!("not an audio container: {}", kind.mime_type())),
        None => Err("unrecognized file content".to_string()),
    }
}

pub struct DjPipeline {
    store: Arc<dyn RadioStore>,
    engine: Arc<dyn EngineAdapter>,
    bus: Arc<RadioBus>,
    snapshots: Arc<SnapshotCache>,
    llm: LlmRegistry,
    tts: TtsRegistry,
    guardrails: TextGuardrails,
    settings: DjPipelineSettings,
    states: Mutex<HashMap<String, DjJobState>>,
    board: Arc<DjStatusBoard>,
}

impl DjPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RadioStore>,
        engine: Arc<dyn EngineAdapter>,
        bus: Arc<RadioBus>,
        snapshots: Arc<SnapshotCache>,
        llm: LlmRegistry,
        tts: TtsRegistry,
        guardrails: TextGuardrails,
        settings: DjPipelineSettings,
        board: Arc<DjStatusBoard>,
    ) -> Self {
        Self {
            store,
            engine,
            bus,
            snapshots,
            llm,
            tts,
            guardrails,
            settings,
            states: Mutex::new(HashMap::new()),
            board,
        }
    }

    pub fn board(&self) -> Arc<DjStatusBoard> {
        self.board.clone()
    }

    pub fn llm_stats(&self) -> Vec<crate::providers::TierStats> {
        self.llm.stats()
    }

    pub fn tts_stats(&self) -> Vec<crate::providers::TierStats> {
        self.tts.stats()
    }

    /// Arm a job. Re-arming a dedup key already in a non-terminal state is
    /// a no-op; returns whether the job was actually armed.
    pub fn try_arm(&self, spec: &DjJobSpec) -> bool {
        {
            let mut states = self.states.lock().unwrap();
            if let Some(state) = states.get(&spec.dedup_key) {
                if !state.is_terminal() {
                    debug!(dedup_key = %spec.dedup_key, "Job already in flight, arm is a no-op");
                    return false;
                }
            }
            states.insert(spec.dedup_key.clone(), DjJobState::Armed);
        }
        self.report(spec, DjJobState::Armed, None);
        true
    }

    /// Cancel a job that has not started yet. In-flight jobs notice
    /// obsolescence themselves at the next state transition.
    pub fn cancel_armed(&self, dedup_key: &str) {
        let mut states = self.states.lock().unwrap();
        if states.get(dedup_key) == Some(&DjJobState::Armed) {
            states.insert(dedup_key.to_string(), DjJobState::Cancelled);
        }
    }

    fn set_state(&self, spec: &DjJobSpec, state: DjJobState, detail: Option<String>) {
        self.states
            .lock()
            .unwrap()
            .insert(spec.dedup_key.clone(), state);
        self.report(spec, state, detail);
    }

    fn report(&self, spec: &DjJobSpec, state: DjJobState, detail: Option<String>) {
        self.board.update(DjJobReport {
            dedup_key: spec.dedup_key.clone(),
            track_title: spec.track_title.clone(),
            track_artist: spec.track_artist.clone(),
            state,
            detail: detail.clone(),
            updated_at_ms: now_ms(),
        });
        self.bus.publish_dj_state(DjState {
            dedup_key: spec.dedup_key.clone(),
            state: state.as_str().to_string(),
            track_title: spec.track_title.clone(),
            track_artist: spec.track_artist.clone(),
            epoch_ms: now_ms(),
            detail,
        });
    }

    fn cancel(&self, spec: &DjJobSpec, reason: &str) {
        info!(dedup_key = %spec.dedup_key, reason = %reason, "DJ job cancelled");
        self.set_state(spec, DjJobState::Cancelled, Some(reason.to_string()));
    }

    fn fail(&self, spec: &DjJobSpec, reason: &str) {
        warn!(dedup_key = %spec.dedup_key, reason = %reason, "DJ job failed");
        self.set_state(spec, DjJobState::Failed, Some(reason.to_string()));
    }

    /// Single worker loop: one job in flight at a time, arms queue FIFO in
    /// the channel.
    pub async fn run_worker(
        self: Arc<Self>,
        mut fire_rx: mpsc::Receiver<DjJobSpec>,
        shutdown: CancellationToken,
    ) {
        info!("DJ pipeline worker started");
        loop {
            let spec = tokio::select! {
                spec = fire_rx.recv() => match spec {
                    Some(spec) => spec,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };
            self.process(spec).await;
        }
        info!("DJ pipeline worker stopped");
    }

    pub async fn process(&self, spec: DjJobSpec) {
        // A fire that raced a cancellation is absorbed here.
        if let Some(state) = self.states.lock().unwrap().get(&spec.dedup_key) {
            if state.is_terminal() {
                debug!(dedup_key = %spec.dedup_key, "Dropping fire for terminal job");
                return;
            }
        }

        // Freshness gate: do not stack DJ lines.
        let spacing_ms = self.settings.min_dj_spacing.as_millis() as i64;
        match self.store.latest_dj_event_since(now_ms() - spacing_ms) {
            Ok(Some(_)) => return self.cancel(&spec, "a DJ line played too recently"),
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "Freshness check unavailable, proceeding");
            }
        }

        // Never introduce our own clips.
        if spec
            .track_artist
            .eq_ignore_ascii_case(&self.settings.clip_artist)
            || spec.track_title.to_lowercase().contains("dj intro")
        {
            return self.cancel(&spec, "target is a DJ clip");
        }

        self.set_state(&spec, DjJobState::Generating, None);

        let line = {
            let style = self
                .settings
                .style_hints
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_default();
            let template = match spec.mode {
                TtsMode::Outro => &self.settings.outro_prompt,
                _ => &self.settings.intro_prompt,
            };
            let prompt = template
                .replace("{style}", &style)
                .replace("{title}", &spec.track_title)
                .replace("{artist}", &spec.track_artist);
            let request = LineRequest {
                prompt,
                title: spec.track_title.clone(),
                artist: spec.track_artist.clone(),
            };
            let artist = spec.track_artist.clone();
            let guardrails = self.guardrails.clone();
            match self
                .llm
                .generate(&request, &move |text| guardrails.validate(text, &artist))
                .await
            {
                Ok(line) => line,
                Err(e) => return self.fail(&spec, &format!("no usable text: {}", e)),
            }
        };

        self.set_state(&spec, DjJobState::Synthesizing, Some(line.provider.clone()));

        let epoch_ms = now_ms();
        let audio_path = self
            .settings
            .tts_dir
            .join(format!("{}_{}.mp3", spec.mode.as_str(), epoch_ms));
        let transcript_path = self
            .settings
            .tts_dir
            .join(format!("{}_{}.txt", spec.mode.as_str(), epoch_ms));

        if let Err(e) = tokio::fs::create_dir_all(&self.settings.tts_dir).await {
            return self.fail(&spec, &format!("cannot create tts dir: {}", e));
        }
        if let Err(e) = tokio::fs::write(&transcript_path, format!("{}\n", line.text)).await {
            return self.fail(&spec, &format!("cannot write transcript: {}", e));
        }

        let min_bytes = self.settings.min_audio_bytes;
        let synthesis = self
            .tts
            .synthesize(
                &SynthesisRequest {
                    text: &line.text,
                    voice: &self.settings.voice,
                    language: &self.settings.language,
                    out_path: &audio_path,
                },
                &move |path| validate_clip(path, min_bytes),
            )
            .await;
        if let Err(e) = synthesis {
            let _ = tokio::fs::remove_file(&audio_path).await;
            let _ = tokio::fs::remove_file(&transcript_path).await;
            return self.fail(&spec, &format!("synthesis failed: {}", e));
        }

        let size_bytes = tokio::fs::metadata(&audio_path)
            .await
            .map(|m| m.len() as i64)
            .ok();

        let tts_id = match self.store.register_tts(&NewTtsArtifact {
            epoch_ms,
            text: line.text.clone(),
            audio_path: audio_path.to_string_lossy().to_string(),
            transcript_path: transcript_path.to_string_lossy().to_string(),
            track_title: Some(spec.track_title.clone()),
            track_artist: Some(spec.track_artist.clone()),
            mode: spec.mode,
            voice: Some(self.settings.voice.clone()),
        }) {
            Ok(id) => id,
            Err(e) => return self.fail(&spec, &format!("cannot register artifact: {}", e)),
        };
        if let Err(e) = self
            .store
            .mark_tts(tts_id, TtsStatus::Ready, size_bytes, None)
        {
            return self.fail(&spec, &format!("cannot mark artifact ready: {}", e));
        }

        self.set_state(&spec, DjJobState::Registered, None);

        // Timeliness: the intro is useful while its target is current or
        // still queued. If the queue has moved past it, discard the clip.
        if self.target_is_obsolete(&spec) {
            let _ = self.store.mark_tts(tts_id, TtsStatus::Garbage, None, None);
            return self.cancel(&spec, "target track already passed");
        }

        let meta = ClipMetadata {
            artist: self.settings.clip_artist.clone(),
            title: format!("DJ Intro - {}", spec.track_title),
            album: self.settings.clip_album.clone(),
        };
        let mut last_error = String::new();
        for attempt in 0..=self.settings.enqueue_retries {
            match self.engine.enqueue_tts(&audio_path, &meta).await {
                Ok(()) => {
                    info!(
                        dedup_key = %spec.dedup_key,
                        title = %spec.track_title,
                        artist = %spec.track_artist,
                        provider = %line.provider,
                        "DJ intro enqueued"
                    );
                    return self.set_state(&spec, DjJobState::Enqueued, None);
                }
                Err(e) => {
                    last_error = e.to_string();
                    debug!(attempt, error = %last_error, "Enqueue attempt failed");
                    tokio::time::sleep(self.settings.enqueue_backoff).await;
                }
            }
        }

        let _ = self.store.mark_tts(tts_id, TtsStatus::Garbage, None, None);
        self.fail(&spec, &format!("enqueue failed: {}", last_error));
    }

    fn target_is_obsolete(&self, spec: &DjJobSpec) -> bool {
        let matches = |title: &str, artist: &str| {
            title.eq_ignore_ascii_case(&spec.track_title)
                && artist.eq_ignore_ascii_case(&spec.track_artist)
        };
        if let Some(now) = self.snapshots.now() {
            if matches(&now.title, &now.artist) {
                return false;
            }
            let upcoming = self.snapshots.next(self.snapshots.upcoming_limit());
            if upcoming.iter().any(|e| matches(&e.title, &e.artist)) {
                return false;
            }
            // Only call it obsolete when we have a queue view that no
            // longer contains the target.
            !upcoming.is_empty()
        } else {
            // No snapshot at all: give the clip the benefit of the doubt.
            false
        }
    }
}
