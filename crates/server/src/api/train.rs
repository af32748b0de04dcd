//! Training pipeline trigger and run history.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use tracing::{error, info};

use objdet_core::RunId;
use objdet_pipeline::{PipelineError, TrainPipeline};

use crate::state::AppState;

use super::{error_body, ApiResult};

/// `GET|POST /train`: run the pipeline to completion within the request.
pub async fn train(State(state): State<Arc<AppState>>) -> ApiResult {
    let run_id = RunId::generate();
    info!(%run_id, "starting model training");

    let pipeline = TrainPipeline::new(
        run_id,
        state.store.clone(),
        state.config.ingestion.clone(),
        state.fetcher.clone(),
    );
    let cancel = state.shutdown.child_token();

    // Detached so a client disconnect does not drop the run halfway; shutdown still cancels it.
    let registry = state.registry.clone();
    let run = tokio::spawn(async move { registry.run_exclusive(pipeline, &cancel).await });
    let result = match run.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "training task failed");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Training failed: {e}"));
        }
    };

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "message": "Training completed successfully!",
                "run_id": outcome.run_id,
                "artifact": outcome.artifact,
            })),
        ),
        Err(PipelineError::Busy { run_id }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": format!("Training already in progress (run {run_id})"),
                "run_id": run_id,
            })),
        ),
        Err(e) => {
            error!(error = %e, "training failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Training failed: {e}"))
        }
    }
}

/// `GET /train/runs`: tracked runs, newest first.
pub async fn list_runs(State(state): State<Arc<AppState>>) -> ApiResult {
    let runs = state.registry.list();
    let active = state.registry.active().map(|r| r.run_id);
    (
        StatusCode::OK,
        Json(json!({ "runs": runs, "active": active })),
    )
}

/// `GET /train/runs/{run_id}`: one tracked run.
pub async fn get_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> ApiResult {
    match state.registry.get(&run_id) {
        Some(record) => (StatusCode::OK, Json(json!(record))),
        None => error_body(StatusCode::NOT_FOUND, format!("Run not found: {run_id}")),
    }
}
