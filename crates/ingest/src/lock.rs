//! Advisory lock file guarding a run's ingestion directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::IngestError;

pub const LOCK_FILE_NAME: &str = ".ingest.lock";

/// Locks older than this are assumed to belong to a crashed process.
pub const STALE_AFTER: Duration = Duration::from_secs(3600);

/// Held for the duration of one ingestion; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(dir: &Path) -> Result<Self, IngestError> {
        Self::acquire_with(dir, STALE_AFTER)
    }

    pub fn acquire_with(dir: &Path, stale_after: Duration) -> Result<Self, IngestError> {
        let path = dir.join(LOCK_FILE_NAME);
        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !is_stale(&path, stale_after) {
                    return Err(IngestError::Locked { path });
                }
                warn!(path = %path.display(), "removing stale ingestion lock");
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(IngestError::io(&path, e)),
                }
                Self::create(&path).map_err(|e| match e.kind() {
                    // Another process won the race for the freed lock.
                    std::io::ErrorKind::AlreadyExists => IngestError::Locked { path: path.clone() },
                    _ => IngestError::io(&path, e),
                })
            }
            Err(e) => Err(IngestError::io(&path, e)),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let owner = serde_json::json!({
            "pid": std::process::id(),
            "acquired_at": Utc::now().to_rfc3339(),
        });
        writeln!(file, "{owner}")?;
        debug!(path = %path.display(), "ingestion lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release ingestion lock");
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= stale_after)
}
