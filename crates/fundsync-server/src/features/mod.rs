//! Feature slices of the Fundsync API
//!
//! Each slice follows the same layout:
//! - `commands/` - write operations
//! - `queries/` - read operations
//! - `routes.rs` - HTTP route definitions
//!
//! Commands and queries are `mediator` request types with a plain `handle`
//! function, so they can be exercised without the HTTP layer.
//!
//! # Features
//!
//! - **jobs**: job submission (uploads and catalog fetches) and job log queries
//! - **templates**: downloadable header-only upload templates

pub mod jobs;
pub mod shared;
pub mod templates;

use axum::Router;
use std::sync::Arc;

use crate::ingest::store::JobLogStore;
use crate::ingest::JobGateway;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// Accepts new jobs
    pub gateway: JobGateway,
    /// Read side of the job logs
    pub logs: Arc<dyn JobLogStore>,
}

/// Creates the API router with all feature routes mounted
///
/// - `/jobs/uploads`, `/jobs/fetches` - job submission
/// - `/job-logs` - job log listing and details
/// - `/uploads/templates` - upload templates
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .merge(jobs::jobs_routes(state.gateway.max_upload_bytes()).with_state(state))
        .merge(templates::templates_routes())
}
