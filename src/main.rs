use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ai_radio_server::artwork::ArtworkService;
use ai_radio_server::bus::RadioBus;
use ai_radio_server::config::{self, AppConfig, LlmTierSettings, TtsTierSettings};
use ai_radio_server::dj::{DjPipeline, DjStatusBoard};
use ai_radio_server::engine::{
    ControlPortAdapter, EngineAdapter, EngineError, HttpIngestClient,
};
use ai_radio_server::ingest::{IngestService, IngestSettings};
use ai_radio_server::providers::llm::{ApiKeySource, OllamaProvider, OpenAiProvider, TemplateProvider};
use ai_radio_server::providers::tts::{CommandTtsProvider, HttpTtsProvider};
use ai_radio_server::providers::{LlmRegistry, TierConfig, TtsRegistry};
use ai_radio_server::scheduler::TimerWheel;
use ai_radio_server::server::{run_server, RequestsLoggingLevel, ServerState};
use ai_radio_server::snapshot::{run_metadata_daemon, SnapshotCache};
use ai_radio_server::store::{RadioStore, SqliteRadioStore};

/// Exit codes for process supervisors.
const EXIT_CONFIG_ERROR: i32 = 64;
const EXIT_ENGINE_UNREACHABLE: i32 = 69;
const EXIT_STORAGE_ERROR: i32 = 74;

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI
    /// arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database file. Can also be set in the config
    /// file.
    #[clap(long)]
    pub db_path: Option<PathBuf>,

    /// Directory for synthesized clips and transcripts.
    #[clap(long)]
    pub tts_dir: Option<PathBuf>,

    /// Directory for the cover-art cache.
    #[clap(long)]
    pub artwork_cache_dir: Option<PathBuf>,

    /// Music library root; cover-art lookups may only read files under
    /// these directories. Repeat for multiple roots.
    #[clap(long = "music-root")]
    pub music_roots: Vec<PathBuf>,

    /// Address to bind the HTTP server on.
    #[clap(long, default_value = "0.0.0.0")]
    pub host: String,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 5055)]
    pub port: u16,

    /// Audio engine control port host.
    #[clap(long, default_value = "127.0.0.1")]
    pub engine_host: String,

    /// Audio engine control port.
    #[clap(long, default_value_t = 1234)]
    pub engine_port: u16,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            host: args.host.clone(),
            port: args.port,
            db_path: args.db_path.clone(),
            tts_dir: args.tts_dir.clone(),
            artwork_cache_dir: args.artwork_cache_dir.clone(),
            music_roots: args.music_roots.clone(),
            frontend_dir_path: args.frontend_dir_path.clone(),
            logging_level: args.logging_level.clone(),
            engine_host: args.engine_host.clone(),
            engine_port: args.engine_port,
        }
    }
}

fn build_llm_registry(tiers: &[LlmTierSettings]) -> LlmRegistry {
    let mut registry = LlmRegistry::new();
    for tier in tiers {
        let config = TierConfig {
            timeout: tier.timeout,
            retries: tier.retries,
            rate_limit_delay: tier.rate_limit_delay,
        };
        match tier.provider.as_str() {
            "openai" => {
                let key_source = match (&tier.api_key, &tier.api_key_command) {
                    (_, Some(cmd)) => ApiKeySource::Command(cmd.clone()),
                    (Some(key), None) => ApiKeySource::Static(key.clone()),
                    (None, None) => ApiKeySource::None,
                };
                registry.push_tier(
                    Arc::new(OpenAiProvider::new(
                        tier.base_url.clone(),
                        tier.model.clone(),
                        key_source,
                        tier.temperature,
                    )),
                    config,
                );
            }
            "ollama" => {
                registry.push_tier(
                    Arc::new(OllamaProvider::new(
                        tier.base_url.clone(),
                        tier.model.clone(),
                        tier.temperature,
                    )),
                    config,
                );
            }
            "template" => {
                registry.push_tier(
                    Arc::new(TemplateProvider::new(tier.templates.clone())),
                    config,
                );
            }
            other => unreachable!("config validation admits no provider \"{}\"", other),
        }
    }
    registry
}

fn build_tts_registry(tiers: &[TtsTierSettings]) -> TtsRegistry {
    let mut registry = TtsRegistry::new();
    for tier in tiers {
        let config = TierConfig {
            timeout: tier.timeout,
            retries: tier.retries,
            rate_limit_delay: tier.rate_limit_delay,
        };
        match tier.provider.as_str() {
            "http" => registry.push_tier(
                Arc::new(HttpTtsProvider::new(tier.name.clone(), tier.base_url.clone())),
                config,
            ),
            "command" => registry.push_tier(
                Arc::new(CommandTtsProvider::new(tier.command.clone())),
                config,
            ),
            other => unreachable!("config validation admits no provider \"{}\"", other),
        }
    }
    registry
}

/// Open the store, retrying through the startup grace window.
async fn open_store_with_grace(config: &AppConfig) -> Option<SqliteRadioStore> {
    let deadline = Instant::now() + config.startup_grace;
    loop {
        match SqliteRadioStore::new(&config.db_path) {
            Ok(store) => return Some(store),
            Err(e) if Instant::now() < deadline => {
                warn!(error = %e, "Store not ready, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                error!(error = %e, "Store unavailable beyond startup grace");
                return None;
            }
        }
    }
}

/// Probe the engine until it answers or the grace window passes.
async fn probe_engine_with_grace(engine: &dyn EngineAdapter, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match engine.now().await {
            Ok(_) => return true,
            Err(EngineError::Unavailable(_)) | Err(EngineError::Timeout)
                if Instant::now() < deadline =>
            {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                error!(error = %e, "Engine unreachable beyond startup grace");
                return false;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    // Resolve configuration; any problem here is exit code 64.
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            match config::FileConfig::load(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    error!("{:#}", e);
                    std::process::exit(EXIT_CONFIG_ERROR);
                }
            }
        }
        None => None,
    };
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = match AppConfig::resolve(&cli_config, file_config) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    info!("Configuration loaded:");
    info!("  db_path: {:?}", app_config.db_path);
    info!("  tts_dir: {:?}", app_config.tts_dir);
    info!(
        "  engine: {}:{}",
        app_config.engine.control.host, app_config.engine.control.port
    );
    info!("  port: {}", app_config.port);

    let Some(store) = open_store_with_grace(&app_config).await else {
        std::process::exit(EXIT_STORAGE_ERROR);
    };
    let store: Arc<dyn RadioStore> = Arc::new(store);

    // Crash recovery: artifacts left pending by a previous run are dead.
    match store.sweep_pending_tts() {
        Ok(0) => {}
        Ok(swept) => info!("Swept {} stale pending TTS artifacts to failed", swept),
        Err(e) => warn!(error = %e, "Startup sweep failed"),
    }

    let shutdown_token = CancellationToken::new();

    let http_ingest = app_config.engine.ingest_url.as_ref().map(|url| {
        info!("Clip delivery via HTTP ingestion at {}", url);
        HttpIngestClient::new(url, &app_config.engine.ingest_slot, app_config.engine.ingest_timeout)
    });
    let engine: Arc<dyn EngineAdapter> = Arc::new(ControlPortAdapter::new(
        app_config.engine.control.clone(),
        http_ingest,
        shutdown_token.child_token(),
    ));

    if !probe_engine_with_grace(engine.as_ref(), app_config.startup_grace).await {
        shutdown_token.cancel();
        std::process::exit(EXIT_ENGINE_UNREACHABLE);
    }
    info!("Engine control port is answering");

    let bus = Arc::new(RadioBus::default());
    let snapshots = Arc::new(SnapshotCache::new(
        app_config.snapshot.staleness_cap,
        app_config.snapshot.upcoming_limit,
    ));

    let board = Arc::new(DjStatusBoard::default());
    let pipeline = Arc::new(DjPipeline::new(
        store.clone(),
        engine.clone(),
        bus.clone(),
        snapshots.clone(),
        build_llm_registry(&app_config.llm_tiers),
        build_tts_registry(&app_config.tts_tiers),
        app_config.dj.guardrails.clone(),
        app_config.dj.pipeline.clone(),
        board,
    ));

    let (fire_tx, fire_rx) = tokio::sync::mpsc::channel(32);
    let timers = TimerWheel::spawn(fire_tx, shutdown_token.child_token());
    tokio::spawn(pipeline.clone().run_worker(fire_rx, shutdown_token.child_token()));

    let ingest = Arc::new(IngestService::new(
        store.clone(),
        bus.clone(),
        snapshots.clone(),
        pipeline.clone(),
        timers,
        IngestSettings {
            dj_delay: app_config.dj.delay,
            dj_probability: app_config.dj.probability,
            dj_persona: app_config.dj.pipeline.clip_artist.clone(),
        },
    ));

    tokio::spawn(run_metadata_daemon(
        snapshots.clone(),
        engine.clone(),
        store.clone(),
        ingest.clone(),
        app_config.snapshot.tick,
        shutdown_token.child_token(),
    ));

    if app_config.music_roots.is_empty() {
        warn!("No music roots configured; file-based cover lookups are disabled");
    }
    let artwork = Arc::new(ArtworkService::new(
        store.clone(),
        app_config.artwork_cache_dir.clone(),
        app_config.ffmpeg_path.clone(),
        app_config.music_roots.clone(),
    ));

    // Housekeeping: history retention, dead artifact GC, artwork cache cap.
    {
        let store = store.clone();
        let artwork = artwork.clone();
        let retention = app_config.retention.clone();
        let token = shutdown_token.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(retention.housekeeping_interval);
            interval.tick().await; // skip the immediate tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = token.cancelled() => break,
                }

                match store.prune_history(retention.history_keep) {
                    Ok(0) => {}
                    Ok(pruned) => info!("Pruned {} old play events", pruned),
                    Err(e) => warn!(error = %e, "History pruning failed"),
                }

                let cutoff =
                    ai_radio_server::now_ms() - retention.artifact_gc_age.as_millis() as i64;
                match store.reap_dead_tts(cutoff) {
                    Ok(dead) if !dead.is_empty() => {
                        info!("Reaping {} dead TTS artifacts", dead.len());
                        for artifact in dead {
                            let _ = tokio::fs::remove_file(&artifact.audio_path).await;
                            let _ = tokio::fs::remove_file(&artifact.transcript_path).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Artifact GC failed"),
                }

                match artwork.enforce_cap(retention.artwork_cache_cap_bytes).await {
                    Ok(0) => {}
                    Ok(evicted) => info!("Evicted {} artwork cache entries", evicted),
                    Err(e) => warn!(error = %e, "Artwork eviction failed"),
                }
            }
        });
    }

    let state = ServerState {
        store,
        engine,
        snapshots,
        bus,
        ingest,
        artwork,
        pipeline,
        tts_dir: app_config.tts_dir.clone(),
        start_time: Instant::now(),
    };

    info!("Ready to serve at port {}!", app_config.port);

    tokio::select! {
        result = run_server(
            state,
            &app_config.host,
            app_config.port,
            app_config.logging_level.clone(),
            app_config.frontend_dir_path.clone(),
        ) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
