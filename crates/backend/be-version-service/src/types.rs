//! Data types for the version registry documents

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the refresh cycle that produced a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Ok,
    Stale,
    #[default]
    Error,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Ok => "ok",
            SnapshotStatus::Stale => "stale",
            SnapshotStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tool the updater resolves on every cycle
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackedTool {
    pub id: String,
    pub name: String,
}

impl TrackedTool {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Latest known version information for one tracked tool
///
/// Records are only ever built in memory or by the snapshot store, which
/// normalizes legacy field names on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolVersionRecord {
    pub id: String,
    pub name: String,
    /// `None` until the first successful check
    pub latest_version: Option<String>,
    pub last_check_at: Option<DateTime<Utc>>,
    /// Present only when the most recent check failed
    pub last_check_error: Option<String>,
    pub is_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ToolVersionRecord {
    /// A record for a tool that has never been checked
    pub fn unknown(tool: &TrackedTool) -> Self {
        Self {
            id: tool.id.clone(),
            name: tool.name.clone(),
            latest_version: None,
            last_check_at: None,
            last_check_error: None,
            is_stale: true,
            last_success_at: None,
        }
    }
}

/// Root document served by `GET /tools`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSnapshot {
    pub tools: Vec<ToolVersionRecord>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: SnapshotStatus,
}

impl VersionSnapshot {
    /// The document served when nothing valid is on disk
    pub fn fallback() -> Self {
        Self {
            tools: Vec::new(),
            updated_at: None,
            status: SnapshotStatus::Error,
        }
    }

    pub fn find_tool(&self, id: &str) -> Option<&ToolVersionRecord> {
        self.tools.iter().find(|tool| tool.id == id)
    }
}

impl Default for VersionSnapshot {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Client self-update metadata served by `GET /update`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateInfo {
    pub version: Option<String>,
    /// Platform or channel identifier to distribution descriptor, sorted by key
    pub update: BTreeMap<String, serde_json::Value>,
    pub release_notes: Option<String>,
    pub required: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Response for `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthView {
    pub status: SnapshotStatus,
    pub tools_count: usize,
    pub age_minutes: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub tools: Vec<ToolHealth>,
}

/// Per-tool projection used by the health view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolHealth {
    pub id: String,
    pub name: String,
    pub has_version: bool,
    pub is_stale: bool,
    pub has_error: bool,
    pub last_check_at: Option<DateTime<Utc>>,
}
