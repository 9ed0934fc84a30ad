//! Feature modules implementing the ADREP API
//!
//! - **imports**: report upload and import job tracking

pub mod imports;

use adrep_ingest::ImportOrchestrator;
use axum::Router;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// Pipeline that runs uploaded reports
    pub orchestrator: ImportOrchestrator,
    /// Upper bound on an uploaded report body
    pub max_upload_bytes: usize,
}

/// Creates the API router with all feature routes mounted
///
/// - `/imports` - Report upload and import job status
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest(
        "/imports",
        imports::imports_routes(state.max_upload_bytes).with_state(state.orchestrator),
    )
}
