//! Data-ingestion stage: fetch the dataset archive and extract it into the feature store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use objdet_core::{DataIngestionArtifact, IngestionConfig};

use crate::checksum::sha256_file;
use crate::error::{IngestError, StageError};
use crate::extract::ArchiveExtractor;
use crate::fetch::{ArchiveFetcher, FetchResult};
use crate::lock::RunLock;

pub const STAGE_NAME: &str = "data_ingestion";

pub struct DataIngestion {
    config: IngestionConfig,
    fetcher: Arc<dyn ArchiveFetcher>,
    extractor: ArchiveExtractor,
}

impl DataIngestion {
    pub fn new(
        config: IngestionConfig,
        fetcher: Arc<dyn ArchiveFetcher>,
        extractor: ArchiveExtractor,
    ) -> Self {
        Self {
            config,
            fetcher,
            extractor,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Run the stage. Any failure is reported once, tagged with the stage and its config.
    pub async fn initiate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DataIngestionArtifact, StageError> {
        info!(
            source_url = %self.config.source_url,
            download_dir = %self.config.download_dir.display(),
            feature_store = %self.config.feature_store_dir.display(),
            "data ingestion started"
        );

        match self.run(cancel).await {
            Ok(artifact) => {
                info!(
                    feature_store = %artifact.feature_store_path.display(),
                    archive_size_bytes = artifact.archive_size_bytes,
                    file_count = artifact.file_count,
                    fetch_skipped = artifact.fetch_skipped,
                    extract_skipped = artifact.extract_skipped,
                    "data ingestion finished"
                );
                Ok(artifact)
            }
            Err(source) => {
                warn!(kind = source.kind(), error = %source, "data ingestion failed");
                Err(StageError {
                    stage: STAGE_NAME,
                    config: self.config.clone(),
                    source,
                })
            }
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<DataIngestionArtifact, IngestError> {
        let download_dir = &self.config.download_dir;
        tokio::fs::create_dir_all(download_dir)
            .await
            .map_err(|e| IngestError::io(download_dir, e))?;

        let _lock = RunLock::acquire(download_dir)?;
        // Dropping this future (e.g. a disconnected caller) stops blocking work before the lock goes.
        let cancel = &cancel.child_token();
        let _abort = cancel.clone().drop_guard();

        // Without a digest to check, a populated feature store needs nothing from the archive.
        if self.config.expected_sha256.is_none() {
            if let Some(file_count) = self
                .extractor
                .existing_file_count(&self.config.feature_store_dir)
                .await?
            {
                return self.resumed_artifact(file_count).await;
            }
        }

        let fetched = self.fetch_verified(cancel).await?;
        let extracted = self
            .extractor
            .extract(&self.config.local_archive_path, &self.config.feature_store_dir, cancel)
            .await?;

        Ok(DataIngestionArtifact {
            feature_store_path: self.config.feature_store_dir.clone(),
            downloaded_archive_path: Some(self.config.local_archive_path.clone()),
            archive_size_bytes: fetched.size_bytes,
            file_count: extracted.file_count,
            fetch_skipped: fetched.skipped,
            extract_skipped: extracted.skipped,
        })
    }

    /// Artifact for a run whose feature store is already complete. The archive may be gone.
    async fn resumed_artifact(&self, file_count: usize) -> Result<DataIngestionArtifact, IngestError> {
        let archive = &self.config.local_archive_path;
        let (downloaded_archive_path, archive_size_bytes) = match tokio::fs::metadata(archive).await {
            Ok(meta) if meta.is_file() => (Some(archive.clone()), meta.len()),
            Ok(_) => (None, 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (None, 0),
            Err(e) => return Err(IngestError::io(archive, e)),
        };
        info!(
            feature_store = %self.config.feature_store_dir.display(),
            file_count,
            archive_present = downloaded_archive_path.is_some(),
            "feature store already populated, skipping fetch"
        );
        Ok(DataIngestionArtifact {
            feature_store_path: self.config.feature_store_dir.clone(),
            downloaded_archive_path,
            archive_size_bytes,
            file_count,
            fetch_skipped: true,
            extract_skipped: true,
        })
    }

    /// Fetch, then check the digest when one is configured.
    ///
    /// A pre-existing archive that fails the check is discarded and fetched once more.
    async fn fetch_verified(&self, cancel: &CancellationToken) -> Result<FetchResult, IngestError> {
        let archive = &self.config.local_archive_path;
        let fetched = self
            .fetcher
            .fetch(&self.config.source_url, archive, cancel)
            .await?;

        let Some(expected) = self.config.expected_sha256.as_deref() else {
            return Ok(fetched);
        };

        match verify(archive, expected).await? {
            None => Ok(fetched),
            Some(actual) if !fetched.skipped => {
                remove_archive(archive).await?;
                Err(mismatch(archive, expected, actual))
            }
            Some(actual) => {
                warn!(
                    path = %archive.display(),
                    expected,
                    actual = %actual,
                    "existing archive failed checksum, fetching again"
                );
                remove_archive(archive).await?;

                let refetched = self
                    .fetcher
                    .fetch(&self.config.source_url, archive, cancel)
                    .await?;
                match verify(archive, expected).await? {
                    None => Ok(refetched),
                    Some(actual) => {
                        remove_archive(archive).await?;
                        Err(mismatch(archive, expected, actual))
                    }
                }
            }
        }
    }
}

/// `Some(actual digest)` on mismatch.
async fn verify(archive: &Path, expected: &str) -> Result<Option<String>, IngestError> {
    let path = archive.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| IngestError::io(archive, std::io::Error::other(e)))??;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(None)
    } else {
        Ok(Some(actual))
    }
}

async fn remove_archive(archive: &Path) -> Result<(), IngestError> {
    match tokio::fs::remove_file(archive).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IngestError::io(archive, e)),
    }
}

fn mismatch(archive: &Path, expected: &str, actual: String) -> IngestError {
    IngestError::ChecksumMismatch {
        path: PathBuf::from(archive),
        expected: expected.to_string(),
        actual,
    }
}
