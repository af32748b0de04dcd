use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use objdet_core::{ArtifactStore, Config};
use objdet_ingest::ArchiveFetcher;
use objdet_pipeline::RunRegistry;

use crate::detector::Detector;

pub struct AppState {
    pub config: Arc<Config>,
    pub store: ArtifactStore,
    pub fetcher: Arc<dyn ArchiveFetcher>,
    pub registry: Arc<RunRegistry>,
    pub detector: Arc<dyn Detector>,
    /// Cancelled on shutdown; in-flight training runs use child tokens.
    pub shutdown: CancellationToken,
}
