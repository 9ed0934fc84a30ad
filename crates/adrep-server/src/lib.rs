//! ADREP Server Library
//!
//! Thin HTTP surface over the ADREP ingestion pipeline.
//!
//! # Endpoints
//!
//! - `POST /api/v1/imports?filename=<name>`: upload a CSV report (raw body)
//! - `GET /api/v1/imports/:job_id/status`: status line of a job
//! - `GET /api/v1/imports/:job_id/progress`: progress snapshot of a job
//! - `DELETE /api/v1/imports/:job_id`: request cancellation
//! - `GET /health`: storage connectivity check
//!
//! # Example
//!
//! ```no_run
//! use adrep_ingest::{ImportOrchestrator, MemorySink};
//! use adrep_server::{config::Config, create_router};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let orchestrator = ImportOrchestrator::new(config.ingest.clone(), Arc::new(MemorySink::new()));
//!     let app = create_router(orchestrator, &config);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod error;
pub mod features;
pub mod middleware;

pub use error::AppError;

use adrep_ingest::ImportOrchestrator;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::compression::CompressionLayer;

use crate::config::Config;

/// Create the application router with all routes and middleware
pub fn create_router(orchestrator: ImportOrchestrator, config: &Config) -> Router {
    let feature_state = features::FeatureState {
        orchestrator: orchestrator.clone(),
        max_upload_bytes: config.server.max_upload_bytes,
    };

    Router::new()
        .route("/health", get(health_check))
        .with_state(orchestrator)
        .nest("/api/v1", features::router(feature_state))
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Health check handler
async fn health_check(State(orchestrator): State<ImportOrchestrator>) -> Result<Response, AppError> {
    orchestrator.sink().health_check().await.map_err(|e| {
        tracing::error!("Storage health check failed: {:?}", e);
        AppError::Unavailable("Storage is not reachable".to_string())
    })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "running_imports": orchestrator.running(),
        })),
    )
        .into_response())
}
