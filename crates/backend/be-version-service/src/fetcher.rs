//! Contracts for the collaborators that resolve upstream versions

use std::time::Duration;

use async_trait::async_trait;

use crate::types::UpdateInfo;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

/// Resolves the current upstream version of one tool.
///
/// Implementations must bound their own network calls and may be called
/// concurrently for distinct tool ids.
#[async_trait]
pub trait VersionFetcher: Send + Sync {
    async fn fetch(&self, tool_id: &str) -> Result<String, FetchError>;
}

/// Produces the latest client self-update document.
#[async_trait]
pub trait UpdateInfoSource: Send + Sync {
    async fn fetch_update_info(&self) -> Result<UpdateInfo, FetchError>;
}
