//! The training pipeline. Ingestion is the only stage wired today.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use objdet_core::config::IngestionSettings;
use objdet_core::{ArtifactStore, DataIngestionArtifact, RunId};
use objdet_ingest::{ArchiveExtractor, ArchiveFetcher, DataIngestion};

use crate::error::PipelineError;
use crate::state::PipelineState;

/// What happens to the downloaded archive once extraction has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveRetention {
    Keep,
    Remove,
}

impl ArchiveRetention {
    pub fn from_keep_flag(keep: bool) -> Self {
        if keep {
            Self::Keep
        } else {
            Self::Remove
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    pub run_id: RunId,
    pub artifact: DataIngestionArtifact,
}

pub struct TrainPipeline {
    run_id: RunId,
    store: ArtifactStore,
    settings: IngestionSettings,
    fetcher: Arc<dyn ArchiveFetcher>,
    retention: ArchiveRetention,
    state: PipelineState,
}

impl TrainPipeline {
    pub fn new(
        run_id: RunId,
        store: ArtifactStore,
        settings: IngestionSettings,
        fetcher: Arc<dyn ArchiveFetcher>,
    ) -> Self {
        let retention = ArchiveRetention::from_keep_flag(settings.keep_archive);
        Self {
            run_id,
            store,
            settings,
            fetcher,
            retention,
            state: PipelineState::NotStarted,
        }
    }

    pub fn with_retention(mut self, retention: ArchiveRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn start_data_ingestion(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<DataIngestionArtifact, PipelineError> {
        self.state = self.state.advance(PipelineState::Ingesting)?;

        let config = self.store.ingestion_config(&self.settings, &self.run_id);
        let stage = DataIngestion::new(config, self.fetcher.clone(), ArchiveExtractor::new());

        match stage.initiate(cancel).await {
            Ok(artifact) => {
                self.state = self.state.advance(PipelineState::Ingested)?;
                Ok(artifact)
            }
            Err(e) => {
                self.state = self.state.advance(PipelineState::IngestionFailed)?;
                error!(
                    run_id = %self.run_id,
                    stage = e.stage,
                    kind = e.source.kind(),
                    error = %e,
                    "pipeline stage failed"
                );
                Err(e.into())
            }
        }
    }

    /// Run every stage in order, stopping at the first failure.
    pub async fn run_pipeline(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!(run_id = %self.run_id, retention = ?self.retention, "training pipeline started");

        let artifact = self.start_data_ingestion(cancel).await?;
        let artifact = self.apply_retention(artifact).await?;

        self.state = self.state.advance(PipelineState::Completed)?;
        info!(
            run_id = %self.run_id,
            feature_store = %artifact.feature_store_path.display(),
            file_count = artifact.file_count,
            "training pipeline completed"
        );

        Ok(PipelineOutcome {
            run_id: self.run_id.clone(),
            artifact,
        })
    }

    async fn apply_retention(
        &self,
        artifact: DataIngestionArtifact,
    ) -> Result<DataIngestionArtifact, PipelineError> {
        if self.retention == ArchiveRetention::Keep {
            return Ok(artifact);
        }
        if let Some(ref archive) = artifact.downloaded_archive_path {
            match tokio::fs::remove_file(archive).await {
                Ok(()) => info!(path = %archive.display(), "removed downloaded archive"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(PipelineError::Io {
                        path: archive.clone(),
                        source: e,
                    })
                }
            }
        }
        Ok(artifact.without_archive())
    }
}
