//! Fetchers and fixtures shared by the pipeline unit tests.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use objdet_core::config::IngestionSettings;
use objdet_ingest::{ArchiveFetcher, FetchResult, IngestError};

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn settings(root: &Path) -> IngestionSettings {
    IngestionSettings {
        source_url: "https://datasets.invalid/data.zip".to_string(),
        artifact_root: root.to_path_buf(),
        ingestion_dir_name: "data_ingestion".to_string(),
        feature_store_dir_name: "feature_store".to_string(),
        connect_timeout_secs: 1,
        fetch_timeout_secs: 5,
        auth_token: None,
        expected_sha256: None,
        keep_archive: true,
    }
}

fn write_archive(dest: &Path, body: &[u8]) -> FetchResult {
    std::fs::write(dest, body).unwrap();
    FetchResult {
        path: dest.to_path_buf(),
        size_bytes: body.len() as u64,
        skipped: false,
    }
}

/// Writes the same archive bytes on every call.
pub struct StaticFetcher {
    body: Vec<u8>,
}

#[async_trait]
impl ArchiveFetcher for StaticFetcher {
    async fn fetch(
        &self,
        _source_url: &str,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> Result<FetchResult, IngestError> {
        Ok(write_archive(dest, &self.body))
    }
}

pub fn static_fetcher(body: Vec<u8>) -> Arc<dyn ArchiveFetcher> {
    Arc::new(StaticFetcher { body })
}

/// Always reports an unreachable host.
pub struct FailingFetcher;

#[async_trait]
impl ArchiveFetcher for FailingFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        _dest: &Path,
        _cancel: &CancellationToken,
    ) -> Result<FetchResult, IngestError> {
        Err(IngestError::Fetch {
            url: source_url.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

pub fn failing_fetcher() -> Arc<dyn ArchiveFetcher> {
    Arc::new(FailingFetcher)
}

/// Signals `started`, then blocks until `release` is notified.
pub struct GatedFetcher {
    pub body: Vec<u8>,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl ArchiveFetcher for GatedFetcher {
    async fn fetch(
        &self,
        _source_url: &str,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> Result<FetchResult, IngestError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(write_archive(dest, &self.body))
    }
}
