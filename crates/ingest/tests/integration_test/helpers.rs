use std::collections::HashMap;
use std::convert::Infallible;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;

use objdet_core::config::{AwsConfig, IngestionSettings};
use objdet_core::{ArtifactStore, IngestionConfig, RunId};
use objdet_ingest::{ArchiveExtractor, DataIngestion, FetchOptions, RemoteFetcher};

// ── Archive builders ────────────────────────────────────────────────

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes(files)).unwrap();
    encoder.finish().unwrap()
}

pub fn tar_zst_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    zstd::encode_all(Cursor::new(tar_bytes(files)), 3).unwrap()
}

/// A small YOLO-style dataset: images, labels and the dataset manifest.
pub const SAMPLE_DATASET: &[(&str, &[u8])] = &[
    ("train/images/img_001.jpg", b"\xff\xd8\xff fake jpeg 1"),
    ("train/labels/img_001.txt", b"0 0.51 0.42 0.10 0.12"),
    ("valid/images/img_002.jpg", b"\xff\xd8\xff fake jpeg 2"),
    ("valid/labels/img_002.txt", b"1 0.33 0.71 0.05 0.09"),
    ("data.yaml", b"nc: 2\nnames: ['head', 'helmet']\n"),
];

// ── Archive host ────────────────────────────────────────────────────

pub const AUTH_TOKEN: &str = "s3cret";

struct HostState {
    files: HashMap<String, Vec<u8>>,
    hits: AtomicUsize,
}

/// Local HTTP server standing in for the remote dataset host.
///
/// `/datasets/{name}` serves files openly; `/private/{name}` requires the bearer token.
pub struct ArchiveHost {
    pub base_url: String,
    state: Arc<HostState>,
}

impl ArchiveHost {
    pub async fn start(files: Vec<(&str, Vec<u8>)>) -> Self {
        let state = Arc::new(HostState {
            files: files
                .into_iter()
                .map(|(name, bytes)| (name.to_string(), bytes))
                .collect(),
            hits: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/datasets/{name}", get(serve_open))
            .route("/private/{name}", get(serve_private))
            .route("/stalled/{name}", get(serve_stalled))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/datasets/{name}", self.base_url)
    }

    pub fn private_url(&self, name: &str) -> String {
        format!("{}/private/{name}", self.base_url)
    }

    /// Sends headers and a first chunk, then never finishes the body.
    pub fn stalled_url(&self, name: &str) -> String {
        format!("{}/stalled/{name}", self.base_url)
    }

    /// Requests that reached a file handler.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn serve_open(State(state): State<Arc<HostState>>, UrlPath(name): UrlPath<String>) -> Response {
    lookup(&state, &name)
}

async fn serve_private(
    State(state): State<Arc<HostState>>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let expected = format!("Bearer {AUTH_TOKEN}");
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    lookup(&state, &name)
}

async fn serve_stalled(UrlPath(_name): UrlPath<String>) -> Response {
    let first = futures::stream::once(async { Ok::<_, Infallible>(Bytes::from_static(b"PK\x03\x04")) });
    let body = Body::from_stream(first.chain(futures::stream::pending()));
    (StatusCode::OK, body).into_response()
}

fn lookup(state: &HostState, name: &str) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match state.files.get(name) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ── Stage wiring ────────────────────────────────────────────────────

pub fn settings(root: &Path, source_url: &str) -> IngestionSettings {
    IngestionSettings {
        source_url: source_url.to_string(),
        artifact_root: root.to_path_buf(),
        ingestion_dir_name: "data_ingestion".to_string(),
        feature_store_dir_name: "feature_store".to_string(),
        connect_timeout_secs: 2,
        fetch_timeout_secs: 30,
        auth_token: None,
        expected_sha256: None,
        keep_archive: true,
    }
}

pub fn aws() -> AwsConfig {
    AwsConfig {
        region: "us-east-1".to_string(),
        access_key_id: None,
        secret_access_key: None,
        session_token: None,
        endpoint_url: None,
    }
}

pub fn ingestion_config(settings: &IngestionSettings, run: &str) -> IngestionConfig {
    let store = ArtifactStore::from_settings(settings);
    store.ingestion_config(settings, &RunId::parse(run).unwrap())
}

pub fn stage(settings: &IngestionSettings, config: IngestionConfig) -> DataIngestion {
    let fetcher = RemoteFetcher::new(FetchOptions::from_settings(settings), aws()).unwrap();
    DataIngestion::new(config, Arc::new(fetcher), ArchiveExtractor::new())
}

/// `file://` URL for a path on disk.
pub fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

/// Every regular file under `dir`, relative and sorted.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}
