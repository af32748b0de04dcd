//! Server startup and one-shot commands.
//!
//! Builds shared state from `Config`, then either serves HTTP or runs a
//! single pipeline pass from the command line.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use objdet_core::{ArtifactStore, Config, RunId};
use objdet_ingest::{ArchiveFetcher, FetchOptions, RemoteFetcher};
use objdet_pipeline::{RunRegistry, TrainPipeline};

use crate::detector::ProcessDetector;
use crate::router::build_router;
use crate::state::AppState;

/// Wire every collaborator from configuration.
pub fn build_state(config: Config, shutdown: CancellationToken) -> anyhow::Result<Arc<AppState>> {
    let options = FetchOptions::from_settings(&config.ingestion);
    let fetcher: Arc<dyn ArchiveFetcher> = Arc::new(
        RemoteFetcher::new(options, config.aws.clone()).context("failed to build archive fetcher")?,
    );
    let store = ArtifactStore::from_settings(&config.ingestion);
    let registry = Arc::new(RunRegistry::open(store.run_log_path()));
    let detector = Arc::new(ProcessDetector::new(config.detector.clone()));

    Ok(Arc::new(AppState {
        config: Arc::new(config),
        store,
        fetcher,
        registry,
        detector,
        shutdown,
    }))
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    for problem in config.validate() {
        warn!("config: {problem}");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown = CancellationToken::new();
    let state = build_state(config, shutdown.clone())?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    info!("server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, cancelling in-flight training runs first.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        return;
    }
    info!("shutdown requested, cancelling in-flight runs");
    shutdown.cancel();
}

pub async fn train_once(config: Config, run_id: Option<String>) -> anyhow::Result<()> {
    config.ensure_valid()?;

    let run_id = match run_id {
        Some(raw) => RunId::parse(&raw)?,
        None => RunId::generate(),
    };
    let shutdown = CancellationToken::new();
    let state = build_state(config, shutdown.clone())?;

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling run");
            ctrl_c.cancel();
        }
    });

    let pipeline = TrainPipeline::new(
        run_id,
        state.store.clone(),
        state.config.ingestion.clone(),
        state.fetcher.clone(),
    );
    let outcome = state
        .registry
        .run_exclusive(pipeline, &shutdown)
        .await
        .context("training failed")?;

    println!("{}", serde_json::to_string_pretty(&outcome.artifact)?);
    Ok(())
}

/// Print the redacted config and every validation problem.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);

    let problems = config.validate();
    if problems.is_empty() {
        println!("Configuration OK");
        return Ok(());
    }
    for problem in &problems {
        println!("  - {problem}");
    }
    anyhow::bail!("{} configuration problem(s) found", problems.len())
}
