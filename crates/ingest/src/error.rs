use std::path::PathBuf;

use thiserror::Error;

use objdet_core::IngestionConfig;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("archive entry '{entry}' escapes the extraction directory")]
    PathTraversal { entry: String },

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{} is held by another ingestion run", path.display())]
    Locked { path: PathBuf },

    #[error("invalid fetch configuration: {0}")]
    Config(String),

    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable short name for logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Io { .. } => "io",
            Self::CorruptArchive { .. } => "corrupt_archive",
            Self::PathTraversal { .. } => "path_traversal",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::Locked { .. } => "locked",
            Self::Config(_) => "config",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An ingestion failure tagged with the stage that raised it and the config it ran with.
#[derive(Error, Debug)]
#[error("stage '{stage}' failed: {source}")]
pub struct StageError {
    pub stage: &'static str,
    pub config: IngestionConfig,
    #[source]
    pub source: IngestError,
}
