//! On-disk layout for pipeline runs and the records handed between stages.
//!
//! ```text
//! <artifact_root>/
//!   runs.jsonl                      ← one line per finished run
//!   <run_id>/
//!     data_ingestion/
//!       .ingest.lock                ← held while a run owns this directory
//!       <archive file>              ← downloaded dataset archive
//!       feature_store/              ← extracted dataset
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IngestionSettings;
use crate::error::CoreError;

/// Archive name used when the source URL has no usable file name.
pub const DEFAULT_ARCHIVE_NAME: &str = "data.zip";

// ── Run identity ──────────────────────────────────────────────

/// Identifies one pipeline run and scopes its working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// `20260118T093000-1a2b3c4d`: sortable by start time, unique across concurrent starts.
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", stamp, &suffix[..8]))
    }

    /// Accept a caller-supplied id, e.g. to resume a previous run's directory.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(CoreError::InvalidRunId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Ingestion contracts ───────────────────────────────────────

/// Everything the ingestion stage needs for one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub source_url: String,
    pub local_archive_path: PathBuf,
    pub feature_store_dir: PathBuf,
    pub download_dir: PathBuf,
    pub expected_sha256: Option<String>,
}

/// Output of a successful ingestion, consumed read-only by the next stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIngestionArtifact {
    pub feature_store_path: PathBuf,
    pub downloaded_archive_path: Option<PathBuf>,
    pub archive_size_bytes: u64,
    pub file_count: usize,
    pub fetch_skipped: bool,
    pub extract_skipped: bool,
}

impl DataIngestionArtifact {
    /// The same artifact after the orchestrator has removed the archive.
    pub fn without_archive(self) -> Self {
        Self {
            downloaded_archive_path: None,
            ..self
        }
    }
}

// ── Artifact store ────────────────────────────────────────────

/// Path computation for run artifacts. Pure: never touches the filesystem.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    ingestion_dir_name: String,
    feature_store_dir_name: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ingestion_dir_name: "data_ingestion".to_string(),
            feature_store_dir_name: "feature_store".to_string(),
        }
    }

    pub fn from_settings(settings: &IngestionSettings) -> Self {
        Self {
            root: settings.artifact_root.clone(),
            ingestion_dir_name: settings.ingestion_dir_name.clone(),
            feature_store_dir_name: settings.feature_store_dir_name.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    /// JSONL log of finished runs, shared by all runs under this root.
    pub fn run_log_path(&self) -> PathBuf {
        self.root.join("runs.jsonl")
    }

    /// Resolve the ingestion paths for `run_id` under this store's root.
    pub fn ingestion_config(&self, settings: &IngestionSettings, run_id: &RunId) -> IngestionConfig {
        let download_dir = self.run_dir(run_id).join(&self.ingestion_dir_name);
        IngestionConfig {
            source_url: settings.source_url.clone(),
            local_archive_path: download_dir.join(archive_file_name(&settings.source_url)),
            feature_store_dir: download_dir.join(&self.feature_store_dir_name),
            download_dir,
            expected_sha256: settings.expected_sha256.clone(),
        }
    }
}

/// Last path segment of the source URL, or [`DEFAULT_ARCHIVE_NAME`].
///
/// Only plain names are accepted so a hostile URL cannot steer the download
/// outside the run directory.
pub fn archive_file_name(source_url: &str) -> String {
    let last = match url::Url::parse(source_url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string),
        Err(_) => source_url
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .map(str::to_string),
    };

    match last {
        Some(name)
            if name != "."
                && name != ".."
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) =>
        {
            name
        }
        _ => DEFAULT_ARCHIVE_NAME.to_string(),
    }
}
