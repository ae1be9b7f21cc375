//! Shared state handed to every request handler.

use crate::artwork::ArtworkService;
use crate::bus::RadioBus;
use crate::dj::DjPipeline;
use crate::engine::EngineAdapter;
use crate::ingest::IngestService;
use crate::snapshot::SnapshotCache;
use crate::store::RadioStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn RadioStore>,
    pub engine: Arc<dyn EngineAdapter>,
    pub snapshots: Arc<SnapshotCache>,
    pub bus: Arc<RadioBus>,
    pub ingest: Arc<IngestService>,
    pub artwork: Arc<ArtworkService>,
    pub pipeline: Arc<DjPipeline>,
    pub tts_dir: PathBuf,
    pub start_time: Instant,
}
