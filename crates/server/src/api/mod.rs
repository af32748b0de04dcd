//! HTTP endpoint modules.

mod health;
mod predict;
mod train;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiResult = (StatusCode, Json<Value>);

pub(crate) fn error_body(status: StatusCode, message: impl Into<String>) -> ApiResult {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// ── Re-exports ───────────────────────────────────────────────────

pub use health::{health, live};
pub use predict::predict;
pub use train::{get_run, list_runs, train};
