//! Health and live-camera readiness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub model: String,
    pub confidence_threshold: f32,
    pub classes: Vec<String>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "Object Detection API is running!",
        model: state.config.detector.weights.clone(),
        confidence_threshold: state.config.detector.confidence_threshold,
        classes: state.config.detector.classes.clone(),
    })
}

#[derive(Serialize)]
pub struct LiveResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub instructions: &'static str,
}

/// Camera capture happens in the browser; the server only reports readiness.
pub async fn live() -> Json<LiveResponse> {
    Json(LiveResponse {
        status: "ready",
        message: "Live camera detection is ready. Camera access is handled by the browser.",
        instructions: "Use the 'Capture & Analyze' button to take snapshots for detection.",
    })
}
