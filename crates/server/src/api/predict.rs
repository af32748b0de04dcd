//! Single-image detection endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::detector::DetectionRequest;
use crate::image_codec::{self, CodecError};
use crate::state::AppState;

use super::{error_body, ApiResult};

/// Upload and output directories owned by one request.
struct RequestDirs {
    upload: PathBuf,
    output: PathBuf,
}

impl RequestDirs {
    fn new(state: &AppState, request_id: Uuid) -> Self {
        let id = request_id.simple().to_string();
        Self {
            upload: state.config.storage.upload_dir.join(&id),
            output: state.config.storage.results_dir.join(&id),
        }
    }

    async fn cleanup(&self) {
        for dir in [&self.upload, &self.output] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %dir.display(), error = %e, "failed to clean request dir"),
            }
        }
    }
}

/// `POST /predict` with `{"image": "<base64>"}`.
///
/// The body is parsed by hand so a malformed payload gets the same 400 as a missing field.
pub async fn predict(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let image = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("image").and_then(Value::as_str).map(str::to_owned));
    let Some(image) = image else {
        return error_body(StatusCode::BAD_REQUEST, "Missing image data in request");
    };

    let request_id = Uuid::new_v4();
    let dirs = RequestDirs::new(&state, request_id);
    let response = run_detection(&state, &dirs, &image, request_id).await;
    dirs.cleanup().await;
    response
}

async fn run_detection(state: &AppState, dirs: &RequestDirs, image: &str, request_id: Uuid) -> ApiResult {
    if let Err(e) = tokio::fs::create_dir_all(&dirs.upload).await {
        warn!(error = %e, "failed to create upload dir");
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Detection failed: {e}"));
    }

    let source = dirs.upload.join(&state.config.storage.upload_filename);
    match image_codec::decode_to_file(image, &source).await {
        Ok(bytes) => info!(%request_id, bytes, "running object detection on uploaded image"),
        Err(e @ (CodecError::Decode(_) | CodecError::Empty)) => {
            return error_body(StatusCode::BAD_REQUEST, format!("Invalid image data: {e}"));
        }
        Err(e) => {
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Detection failed: {e}"));
        }
    }

    let outcome = match state
        .detector
        .detect(DetectionRequest {
            source,
            output_dir: dirs.output.clone(),
        })
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(%request_id, error = %e, "detector failed");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Detection failed: {e}"));
        }
    };

    if !outcome.success {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Detection process failed");
    }

    match outcome.output_image.as_deref() {
        Some(path) => encode_result(path, request_id).await,
        None => {
            warn!(%request_id, "detection result image not found");
            (
                StatusCode::OK,
                Json(json!({ "error": "Detection result image not found" })),
            )
        }
    }
}

async fn encode_result(path: &Path, request_id: Uuid) -> ApiResult {
    match image_codec::encode_file(path).await {
        Ok(encoded) => {
            info!(%request_id, "object detection completed");
            (StatusCode::OK, Json(json!({ "image": encoded })))
        }
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Detection failed: {e}")),
    }
}
