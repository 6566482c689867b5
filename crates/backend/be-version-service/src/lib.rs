//! Version Registry Service
//!
//! Serves the latest known versions of a set of tracked tools, plus a client
//! self-update document, from a file-persisted snapshot.
//!
//! The [`updater::Updater`] refreshes the snapshot on a fixed schedule and is
//! the only writer. The query router only reads, so the two halves can run in
//! one process or in separate processes sharing a data directory.

use std::{path::PathBuf, sync::Arc};

use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

pub mod error;
pub mod evaluator;
pub mod fetcher;
pub mod handlers;
pub mod service;
pub mod store;
pub mod types;
pub mod updater;

use service::AppState;

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tools", get(handlers::get_tools_handler))
        .route("/tools/{id}", get(handlers::get_tool_handler))
        .route("/update", get(handlers::get_update_handler))
        .route("/health", get(handlers::get_health_handler))
        .fallback(handlers::route_not_found_handler)
        .method_not_allowed_fallback(handlers::method_not_allowed_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Initialize the read side over `data_dir` and return the router
pub fn init_query_service(
    data_dir: impl Into<PathBuf>,
    stale_threshold: chrono::Duration,
) -> Router {
    let data_dir = data_dir.into();
    debug!(
        "Initializing query service over data directory: {}",
        data_dir.display()
    );

    let state = Arc::new(AppState::new(data_dir, stale_threshold));
    create_router(state)
}

// Re-export commonly used types
pub use error::{ErrorResponse, VersionServiceError};
pub use fetcher::{FetchError, UpdateInfoSource, VersionFetcher};
pub use store::{SnapshotStore, StoreError};
pub use types::{
    HealthView, SnapshotStatus, ToolHealth, ToolVersionRecord, TrackedTool, UpdateInfo,
    VersionSnapshot,
};
pub use updater::{CycleResult, Updater, UpdaterConfig, UpdaterHandle};
