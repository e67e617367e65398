//! ecosentinel -- anomaly scoring for geolocated environmental incident reports.
//!
//! Incident reports (illegal cutting, dumping, erosion) are encoded into fixed
//! feature vectors, an isolation forest is trained on a batch of them and
//! persisted as a single artifact, and the artifact is served over HTTP to label
//! new reports `Anomaly` or `Normal`.

pub mod api;
pub mod config;
pub mod detect;
pub mod features;
pub mod storage;

use anyhow::{Context, Result};

/// Start the HTTP service: load the model artifact, then serve the API.
pub async fn serve(config: config::Config) -> Result<()> {
    // 1. Load the model; the service does not start without one.
    let artifact_path = &config.model.artifact_path;
    tracing::info!(path = %artifact_path.display(), "Loading model artifact");
    let scorer = detect::Scorer::load(artifact_path)
        .context("cannot serve without a trained model (run `ecosentinel train` first)")?;

    // 2. Build the router around the injected scorer.
    let state = api::state::AppState::new(scorer, &config.data);
    let app = api::router(state);

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;

    tracing::info!(%addr, "ecosentinel listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
