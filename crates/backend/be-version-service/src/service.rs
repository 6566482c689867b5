//! Read-side state shared by the HTTP handlers

use std::{path::PathBuf, sync::Arc};

use chrono::{Duration, Utc};
use tracing::instrument;

use crate::{
    error::VersionServiceError,
    evaluator,
    store::SnapshotStore,
    types::{HealthView, ToolVersionRecord, UpdateInfo, VersionSnapshot},
};

/// Application state for the query service. It only ever reads the store.
pub struct AppState {
    store: Arc<SnapshotStore>,
    stale_threshold: Duration,
}

impl AppState {
    pub fn new(data_dir: impl Into<PathBuf>, stale_threshold: Duration) -> Self {
        Self::with_store(SnapshotStore::new(data_dir), stale_threshold)
    }

    pub fn with_store(store: SnapshotStore, stale_threshold: Duration) -> Self {
        Self {
            store: Arc::new(store),
            stale_threshold,
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Current snapshot, read off the async executor.
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> Result<VersionSnapshot, VersionServiceError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.load_snapshot())
            .await
            .map_err(|e| VersionServiceError::Persistence(e.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn update_info(&self) -> Result<UpdateInfo, VersionServiceError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.load_update_info())
            .await
            .map_err(|e| VersionServiceError::Persistence(e.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn tool(&self, id: &str) -> Result<ToolVersionRecord, VersionServiceError> {
        let snapshot = self.snapshot().await?;
        snapshot
            .find_tool(id)
            .cloned()
            .ok_or_else(|| VersionServiceError::ToolNotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<HealthView, VersionServiceError> {
        let snapshot = self.snapshot().await?;
        Ok(evaluator::health_view(
            &snapshot,
            Utc::now(),
            self.stale_threshold,
        ))
    }
}
