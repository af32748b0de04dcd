//! Archive fetchers: pull a remote dataset archive onto local disk.
//!
//! Every fetcher follows the same contract:
//! - an existing regular file at the destination short-circuits with `skipped = true`
//!   and no remote I/O;
//! - content is streamed into `<dest>.partial` and renamed into place only once the
//!   whole body has been written and synced, so a present destination is always complete;
//! - no retries. Retry policy belongs to whoever drives the pipeline.

mod http;
mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use objdet_core::config::{AwsConfig, IngestionSettings};

use crate::error::IngestError;

pub use self::http::HttpFetcher;
pub use self::store::ObjectStoreFetcher;

/// Outcome of a single fetch call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// True when the archive was already present and nothing was transferred.
    pub skipped: bool,
}

/// Retrieves a remote archive to a local path.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchResult, IngestError>;
}

// ── Options ─────────────────────────────────────────────────────────

/// Transport settings shared by all fetchers.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub connect_timeout: Duration,
    /// Upper bound for the whole transfer, body included.
    pub timeout: Duration,
    /// Extra request headers (HTTP sources only).
    pub headers: Vec<(String, String)>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(900),
            headers: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn from_settings(settings: &IngestionSettings) -> Self {
        let mut headers = Vec::new();
        if let Some(ref token) = settings.auth_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            timeout: Duration::from_secs(settings.fetch_timeout_secs),
            headers,
        }
    }
}

// ── Scheme dispatch ─────────────────────────────────────────────────

/// Routes `http(s)://` to [`HttpFetcher`] and `s3://` / `file://` to [`ObjectStoreFetcher`].
pub struct RemoteFetcher {
    http: HttpFetcher,
    object_store: ObjectStoreFetcher,
}

impl RemoteFetcher {
    pub fn new(options: FetchOptions, aws: AwsConfig) -> Result<Self, IngestError> {
        Ok(Self {
            http: HttpFetcher::new(&options)?,
            object_store: ObjectStoreFetcher::new(options, aws),
        })
    }
}

#[async_trait]
impl ArchiveFetcher for RemoteFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchResult, IngestError> {
        let scheme = source_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        match scheme.as_str() {
            "http" | "https" => self.http.fetch(source_url, dest, cancel).await,
            "s3" | "file" => self.object_store.fetch(source_url, dest, cancel).await,
            "" => Err(IngestError::fetch(source_url, "source URL has no scheme")),
            other => Err(IngestError::fetch(
                source_url,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// `Some(skipped result)` if a complete archive is already at `dest`.
pub(crate) async fn already_present(dest: &Path) -> Result<Option<FetchResult>, IngestError> {
    match tokio::fs::metadata(dest).await {
        Ok(meta) if meta.is_file() => {
            debug!(path = %dest.display(), size = meta.len(), "archive already present");
            Ok(Some(FetchResult {
                path: dest.to_path_buf(),
                size_bytes: meta.len(),
                skipped: true,
            }))
        }
        Ok(_) => Err(IngestError::io(
            dest,
            std::io::Error::other("destination exists and is not a regular file"),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IngestError::io(dest, e)),
    }
}

/// Sibling temp path the download is streamed into.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Drain `stream` into `dest` through its `.partial` sibling. Returns bytes written.
pub(crate) async fn write_stream_atomically<S, E>(
    source_url: &str,
    stream: S,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64, IngestError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let partial = partial_path(dest);
    let written = match drain_into(source_url, stream, &partial, cancel).await {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&partial, dest).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(IngestError::io(dest, e));
    }
    Ok(written)
}

async fn drain_into<S, E>(
    source_url: &str,
    stream: S,
    partial: &Path,
    cancel: &CancellationToken,
) -> Result<u64, IngestError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    // File::create truncates, so a stale .partial from an interrupted run is discarded.
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| IngestError::io(partial, e))?;
    let mut written = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            chunk = stream.next() => chunk,
        };
        match next {
            Some(Ok(chunk)) => {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| IngestError::io(partial, e))?;
                written += chunk.len() as u64;
            }
            Some(Err(e)) => return Err(IngestError::fetch(source_url, e)),
            None => break,
        }
    }

    file.flush().await.map_err(|e| IngestError::io(partial, e))?;
    file.sync_all().await.map_err(|e| IngestError::io(partial, e))?;
    Ok(written)
}
