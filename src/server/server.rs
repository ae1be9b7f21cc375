//! REST + WebSocket surface of the coordinator.

use super::state::ServerState;
use super::websocket::ws_handler;
use super::{log_requests, RequestsLoggingLevel};
use crate::artwork::{DEFAULT_COVER, DEFAULT_COVER_MIME};
use crate::engine::{ClipMetadata, EngineError};
use crate::ingest::{IngestOutcome, RawTrackEvent};
use crate::now_ms;
use crate::store::{EventKind, NewTtsArtifact, StoreError, TtsMode, TtsStatus};
use anyhow::Result;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tower_http::services::ServeDir;
use tracing::{error, info};

const HISTORY_DEFAULT_LIMIT: usize = 50;
const HISTORY_MAX_LIMIT: usize = 500;
const DJ_TEXT_MAX_CHARS: usize = 2000;

fn store_error_response(e: StoreError) -> Response {
    match e {
        StoreError::Unavailable(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ok": false, "error": reason})),
        )
            .into_response(),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": other.to_string()})),
        )
            .into_response(),
    }
}

fn engine_error_response(e: EngineError) -> Response {
    let status = match e {
        EngineError::Rejected(_) => StatusCode::BAD_GATEWAY,
        EngineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Timeout => StatusCode::GATEWAY_TIMEOUT,
    };
    (status, Json(json!({"ok": false, "error": e.to_string()}))).into_response()
}

#[derive(Serialize)]
struct NowResponse {
    #[serde(flatten)]
    snapshot: Option<crate::snapshot::NowSnapshot>,
    stale: bool,
}

async fn get_now(State(state): State<ServerState>) -> Response {
    Json(NowResponse {
        snapshot: state.snapshots.now(),
        stale: state.snapshots.is_stale(),
    })
    .into_response()
}

#[derive(Deserialize)]
struct NextParams {
    limit: Option<usize>,
}

async fn get_next(State(state): State<ServerState>, Query(params): Query<NextParams>) -> Response {
    let limit = params
        .limit
        .unwrap_or_else(|| state.snapshots.upcoming_limit());
    Json(state.snapshots.next(limit)).into_response()
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    before: Option<i64>,
}

async fn get_history(
    State(state): State<ServerState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .min(HISTORY_MAX_LIMIT);
    match state.store.history(limit, params.before) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => store_error_response(e),
    }
}

#[derive(Deserialize)]
struct CoverParams {
    file: Option<String>,
    artist: Option<String>,
    album: Option<String>,
}

async fn get_cover(State(state): State<ServerState>, Query(params): Query<CoverParams>) -> Response {
    // File paths are validated against the configured music roots inside
    // the artwork service; anything outside them resolves to the default.
    let found = match (&params.file, &params.artist) {
        (Some(file), _) => state.artwork.cover_for_file(file).await,
        (None, Some(artist)) => {
            state
                .artwork
                .cover_for_album(artist, params.album.as_deref().unwrap_or(""))
                .await
        }
        (None, None) => None,
    };

    let (bytes, mime) = found.unwrap_or_else(|| (DEFAULT_COVER.to_vec(), DEFAULT_COVER_MIME));
    ([(header::CONTENT_TYPE, mime)], bytes).into_response()
}

#[derive(Deserialize)]
struct EventBody {
    kind: Option<String>,
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
    uri: Option<String>,
    epoch_ms: Option<i64>,
    extra: Option<serde_json::Value>,
}

async fn post_event(State(state): State<ServerState>, Json(body): Json<EventBody>) -> Response {
    let kind = match body.kind.as_deref() {
        None => None,
        Some(raw) => match EventKind::parse(raw) {
            Some(kind) => Some(kind),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"ok": false, "error": format!("unknown kind \"{}\"", raw)})),
                )
                    .into_response()
            }
        },
    };

    let raw = RawTrackEvent {
        kind,
        title: body.title,
        artist: body.artist,
        album: body.album,
        source_uri: body.uri,
        epoch_ms: body.epoch_ms,
        extra: body.extra,
    };
    match state.ingest.ingest(raw) {
        Ok(IngestOutcome::Committed { id }) => Json(json!({"ok": true, "id": id})).into_response(),
        Ok(IngestOutcome::Deduped { existing_id }) => {
            Json(json!({"ok": true, "deduped": true, "id": existing_id})).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

#[derive(Deserialize)]
struct EnqueueBody {
    file: String,
    title: Option<String>,
    artist: Option<String>,
    #[allow(dead_code)]
    comment: Option<String>,
}

async fn post_enqueue(State(state): State<ServerState>, Json(body): Json<EnqueueBody>) -> Response {
    let path = PathBuf::from(&body.file);
    if !path.is_absolute() || !path.exists() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": "no such file"})),
        )
            .into_response();
    }

    let meta = ClipMetadata {
        artist: body.artist.unwrap_or_else(|| "AI DJ".to_string()),
        title: body.title.unwrap_or_else(|| "DJ Clip".to_string()),
        album: "AI Radio".to_string(),
    };
    match state.engine.enqueue_tts(&path, &meta).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => engine_error_response(e),
    }
}

#[derive(Deserialize)]
struct TtsQueueBody {
    text: String,
    audio_url: String,
    track_title: Option<String>,
    track_artist: Option<String>,
}

/// Register an externally produced clip: TTS artifact plus a DJ history
/// event, linked atomically, then broadcast.
async fn post_tts_queue(
    State(state): State<ServerState>,
    Json(body): Json<TtsQueueBody>,
) -> Response {
    let text: String = body.text.trim().chars().take(DJ_TEXT_MAX_CHARS).collect();
    if text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "no text provided"})),
        )
            .into_response();
    }

    // `/tts/<name>` URLs resolve into the artifact directory; anything else
    // is taken as a path on the shared filesystem.
    let audio_path = match body.audio_url.strip_prefix("/tts/") {
        Some(name) if !name.contains('/') && !name.contains("..") => state.tts_dir.join(name),
        Some(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "error": "bad audio_url"})),
            )
                .into_response()
        }
        None => PathBuf::from(&body.audio_url),
    };

    let epoch_ms = now_ms();
    let size_bytes = std::fs::metadata(&audio_path).map(|m| m.len() as i64).ok();
    let artifact = NewTtsArtifact {
        epoch_ms,
        text: text.clone(),
        audio_path: audio_path.to_string_lossy().to_string(),
        transcript_path: audio_path
            .with_extension("txt")
            .to_string_lossy()
            .to_string(),
        track_title: body.track_title.clone(),
        track_artist: body.track_artist.clone(),
        mode: TtsMode::Custom,
        voice: None,
    };

    let tts_id = match state.store.register_tts(&artifact) {
        Ok(id) => id,
        Err(e) => return store_error_response(e),
    };
    if let Err(e) = state
        .store
        .mark_tts(tts_id, TtsStatus::Ready, size_bytes, None)
    {
        return store_error_response(e);
    }

    let raw = RawTrackEvent {
        kind: Some(EventKind::Dj),
        title: body.track_title.unwrap_or_else(|| "DJ Intro".to_string()),
        artist: body.track_artist.unwrap_or_else(|| "AI DJ".to_string()),
        album: String::new(),
        source_uri: Some(artifact.audio_path.clone()),
        epoch_ms: Some(epoch_ms),
        extra: None,
    };
    match state.ingest.ingest(raw) {
        Ok(IngestOutcome::Committed { id }) => {
            Json(json!({"ok": true, "id": id, "tts_id": tts_id})).into_response()
        }
        Ok(IngestOutcome::Deduped { existing_id }) => {
            Json(json!({"ok": true, "deduped": true, "id": existing_id, "tts_id": tts_id}))
                .into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn post_skip(State(state): State<ServerState>) -> Response {
    // Fire and forget; the engine result only shows up in logs.
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.skip().await {
            error!(error = %e, "Skip request failed");
        }
    });
    (StatusCode::ACCEPTED, Json(json!({"ok": true}))).into_response()
}

async fn get_health(State(state): State<ServerState>) -> Response {
    let store_reachable = state.store.stats().is_ok();
    let engine_reachable = !state.snapshots.is_stale();
    Json(json!({
        "ok": store_reachable,
        "engine": {"reachable": engine_reachable},
        "store": {"reachable": store_reachable},
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
    .into_response()
}

async fn healthz() -> Response {
    Json(json!({"ok": true, "ts": now_ms() / 1000})).into_response()
}

async fn get_stats(State(state): State<ServerState>) -> Response {
    match state.store.stats() {
        Ok(stats) => Json(json!({
            "store": stats,
            "bus_dropped_frames": state.bus.dropped_total(),
            "llm_tiers": state.pipeline.llm_stats(),
            "tts_tiers": state.pipeline.tts_stats(),
        }))
        .into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn get_dj_status(State(state): State<ServerState>) -> Response {
    Json(state.pipeline.board().view()).into_response()
}

async fn serve_tts_file(
    State(state): State<ServerState>,
    AxumPath(filename): AxumPath<String>,
) -> Response {
    if filename.contains('/') || filename.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let path = state.tts_dir.join(&filename);
    let Ok(bytes) = tokio::fs::read(&path).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("txt") => "text/plain; charset=utf-8",
        _ => infer::get(&bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream"),
    };
    ([(header::CONTENT_TYPE, mime)], bytes).into_response()
}

async fn home(State(state): State<ServerState>) -> Response {
    Json(json!({
        "service": "ai-radio-server",
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
    .into_response()
}

pub fn make_app(
    state: ServerState,
    logging_level: RequestsLoggingLevel,
    frontend_dir_path: Option<String>,
) -> Router {
    let api_routes = Router::new()
        .route("/now", get(get_now))
        .route("/next", get(get_next))
        .route("/history", get(get_history))
        .route("/cover", get(get_cover))
        .route("/event", post(post_event))
        .route("/enqueue", post(post_enqueue))
        .route("/tts_queue", post(post_tts_queue))
        .route("/skip", post(post_skip))
        .route("/health", get(get_health))
        .route("/stats", get(get_stats))
        .route("/dj/status", get(get_dj_status))
        .with_state(state.clone());

    let root_routes = Router::new()
        .route("/tts/{filename}", get(serve_tts_file))
        .route("/ws", get(ws_handler))
        .with_state(state.clone());

    let home_router = match frontend_dir_path {
        Some(frontend_path) => {
            let static_files = ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files)
        }
        None => Router::new().route("/", get(home)).with_state(state),
    };

    home_router
        .nest("/api", api_routes)
        .merge(root_routes)
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn_with_state(logging_level, log_requests))
}

pub async fn run_server(
    state: ServerState,
    host: &str,
    port: u16,
    logging_level: RequestsLoggingLevel,
    frontend_dir_path: Option<String>,
) -> Result<()> {
    let app = make_app(state, logging_level, frontend_dir_path);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("Listening on {}:{}", host, port);
    Ok(axum::serve(listener, app).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RadioBus;
    use crate::dj::{DjPipeline, DjPipelineSettings, DjStatusBoard, TextGuardrails};
    use crate::engine::{EngineAdapter, EngineNow, TrackRef};
    use crate::ingest::{IngestService, IngestSettings};
    use crate::providers::{LlmRegistry, TtsRegistry};
    use crate::scheduler::TimerWheel;
    use crate::snapshot::SnapshotCache;
    use crate::store::SqliteRadioStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct StubEngine;

    #[async_trait]
    impl EngineAdapter for StubEngine {
        async fn now(&self) -> Result<EngineNow, EngineError> {
            Err(EngineError::Unavailable("stub".to_string()))
        }

        async fn upcoming(&self, _n: usize) -> Result<Vec<TrackRef>, EngineError> {
            Ok(Vec::new())
        }

        async fn enqueue_tts(
            &self,
            _path: &Path,
            _meta: &ClipMetadata,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn skip(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn build_app() -> (Router, Arc<SnapshotCache>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRadioStore::new(tmp.path().join("radio.db")).unwrap());
        let engine: Arc<dyn EngineAdapter> = Arc::new(StubEngine);
        let bus = Arc::new(RadioBus::default());
        let snapshots = Arc::new(SnapshotCache::default());
        let board = Arc::new(DjStatusBoard::default());
        let pipeline = Arc::new(DjPipeline::new(
            store.clone(),
            engine.clone(),
            bus.clone(),
            snapshots.clone(),
            LlmRegistry::new(),
            TtsRegistry::new(),
            TextGuardrails::default(),
            DjPipelineSettings {
                tts_dir: tmp.path().join("tts"),
                ..Default::default()
            },
            board,
        ));
        let (fire_tx, _fire_rx) = tokio::sync::mpsc::channel(8);
        let timers = TimerWheel::spawn(fire_tx, CancellationToken::new());
        let ingest = Arc::new(IngestService::new(
            store.clone(),
            bus.clone(),
            snapshots.clone(),
            pipeline.clone(),
            timers,
            IngestSettings::default(),
        ));
        let artwork = Arc::new(crate::artwork::ArtworkService::new(
            store.clone(),
            tmp.path().join("covers"),
            "ffmpeg".to_string(),
            vec![tmp.path().join("music")],
        ));
        let state = ServerState {
            store,
            engine,
            snapshots: snapshots.clone(),
            bus,
            ingest,
            artwork,
            pipeline,
            tts_dir: tmp.path().join("tts"),
            start_time: Instant::now(),
        };
        (
            make_app(state, RequestsLoggingLevel::None, None),
            snapshots,
            tmp,
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn repeated_event_is_deduped() {
        let (app, _snapshots, _tmp) = build_app();
        let event = json!({"kind": "song", "title": "X", "artist": "Y", "epoch_ms": 1_000_000});

        let first = app
            .clone()
            .oneshot(post_json("/api/event", event.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = body_json(first).await;
        assert_eq!(first["ok"], true);
        assert!(first.get("deduped").is_none());

        let second = app
            .clone()
            .oneshot(post_json("/api/event", event))
            .await
            .unwrap();
        let second = body_json(second).await;
        assert_eq!(second["deduped"], true);

        let history = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/history?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let history = body_json(history).await;
        let entries = history.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["title"], "X");
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let (app, _snapshots, _tmp) = build_app();
        let response = app
            .oneshot(post_json(
                "/api/event",
                json!({"kind": "jingle", "title": "X"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn now_is_stale_until_engine_is_observed() {
        let (app, snapshots, _tmp) = build_app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/now").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["stale"], true);

        snapshots.observe_now(&EngineNow {
            title: "T".to_string(),
            artist: "A".to_string(),
            ..Default::default()
        });
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/now").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["stale"], false);
        assert_eq!(body["title"], "T");
        assert!(body["track_started_at_ms"].as_i64().is_some());
    }

    #[tokio::test]
    async fn now_started_at_is_stable_across_requests() {
        let (app, snapshots, _tmp) = build_app();
        let observed = EngineNow {
            title: "T".to_string(),
            artist: "A".to_string(),
            ..Default::default()
        };
        snapshots.observe_now(&observed);

        let first = body_json(
            app.clone()
                .oneshot(Request::builder().uri("/api/now").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;

        snapshots.observe_now(&observed);
        let second = body_json(
            app.clone()
                .oneshot(Request::builder().uri("/api/now").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(first["track_started_at_ms"], second["track_started_at_ms"]);
    }

    #[tokio::test]
    async fn skip_returns_accepted_immediately() {
        let (app, _snapshots, _tmp) = build_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/skip")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn cover_falls_back_to_bundled_default() {
        let (app, _snapshots, _tmp) = build_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/cover?file=/no/such/file.mp3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            DEFAULT_COVER_MIME
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], DEFAULT_COVER);
    }

    #[tokio::test]
    async fn cover_outside_music_roots_serves_default_not_file() {
        let (app, _snapshots, tmp) = build_app();
        // A readable file outside the configured music root must never be
        // opened, even though the path is absolute and traversal-free.
        let outside = tmp.path().join("outside.txt");
        std::fs::write(&outside, b"sensitive").unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/cover?file={}", outside.to_str().unwrap()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], DEFAULT_COVER);
    }

    #[tokio::test]
    async fn tts_queue_registers_artifact_and_dj_event() {
        let (app, _snapshots, tmp) = build_app();
        let tts_dir = tmp.path().join("tts");
        std::fs::create_dir_all(&tts_dir).unwrap();
        let clip = tts_dir.join("custom_1.mp3");
        std::fs::write(&clip, vec![0u8; 1500]).unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/tts_queue",
                json!({
                    "text": "Here is a special dedication.",
                    "audio_url": "/tts/custom_1.mp3",
                    "track_title": "Dedication Hour"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert!(body["tts_id"].as_i64().is_some());

        let history = body_json(
            app.clone()
                .oneshot(
                    Request::builder()
                        .uri("/api/history?limit=1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;
        let entry = &history.as_array().unwrap()[0];
        assert_eq!(entry["kind"], "dj");
        assert_eq!(entry["tts_text"], "Here is a special dedication.");
    }

    #[tokio::test]
    async fn tts_queue_requires_text() {
        let (app, _snapshots, _tmp) = build_app();
        let response = app
            .oneshot(post_json(
                "/api/tts_queue",
                json!({"text": "   ", "audio_url": "/tts/x.mp3"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tts_files_are_served_with_traversal_guard() {
        let (app, _snapshots, tmp) = build_app();
        let tts_dir = tmp.path().join("tts");
        std::fs::create_dir_all(&tts_dir).unwrap();
        std::fs::write(tts_dir.join("intro_1.txt"), "hello\n").unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/tts/intro_1.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/tts/..%2Fradio.db")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_component_reachability() {
        let (app, _snapshots, _tmp) = build_app();
        let body = body_json(
            app.oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
        )
        .await;
        assert_eq!(body["store"]["reachable"], true);
        // No engine observation yet, so snapshots are stale.
        assert_eq!(body["engine"]["reachable"], false);
    }

    #[tokio::test]
    async fn stats_exposes_tier_counters() {
        let (app, _snapshots, _tmp) = build_app();
        let body = body_json(
            app.oneshot(
                Request::builder()
                    .uri("/api/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
        )
        .await;
        assert!(body["store"]["song_events"].is_number());
        assert!(body["llm_tiers"].is_array());
    }
}
