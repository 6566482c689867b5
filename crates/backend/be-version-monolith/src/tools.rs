//! Tracked tools file

use std::path::Path;

use be_version_service::TrackedTool;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{MonolithError, Result};

#[derive(Debug, Default, Deserialize)]
pub struct ToolsFile {
    #[serde(default)]
    pub tools: Vec<ToolSource>,
}

/// Where the HTTP adapter looks up one tool's version
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolSource {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// JSON document holding the version
    pub url: String,
    /// JSON pointer to the version inside the document
    #[serde(default = "default_pointer")]
    pub pointer: String,
    /// Removed from the front of the resolved version, e.g. "v"
    #[serde(default)]
    pub strip_prefix: Option<String>,
}

fn default_pointer() -> String {
    "/version".to_string()
}

impl ToolSource {
    pub fn tracked(&self) -> TrackedTool {
        TrackedTool::new(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| self.id.clone()),
        )
    }
}

impl ToolsFile {
    pub fn tracked(&self) -> Vec<TrackedTool> {
        self.tools.iter().map(ToolSource::tracked).collect()
    }
}

pub fn load_tools_file(path: &Path) -> Result<ToolsFile> {
    if !path.exists() {
        warn!(
            "Tools file {} not found, no tools will be tracked",
            path.display()
        );
    }

    let mut file: ToolsFile =
        be_fs::read_toml_file_or_default(path).map_err(|e| MonolithError::ToolsFile {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        })?;

    for tool in &file.tools {
        if tool.id.trim().is_empty() {
            return Err(MonolithError::ToolsFile {
                path: path.to_path_buf(),
                reason: "tool id must not be empty".to_string(),
            });
        }
        if !tool.pointer.is_empty() && !tool.pointer.starts_with('/') {
            return Err(MonolithError::ToolsFile {
                path: path.to_path_buf(),
                reason: format!(
                    "pointer '{}' of tool '{}' must start with '/'",
                    tool.pointer, tool.id
                ),
            });
        }
    }

    // First entry wins.
    let mut unique: Vec<ToolSource> = Vec::with_capacity(file.tools.len());
    for tool in file.tools {
        if unique.iter().any(|existing| existing.id == tool.id) {
            warn!("Ignoring duplicate tool '{}' in {}", tool.id, path.display());
            continue;
        }
        unique.push(tool);
    }
    file.tools = unique;

    debug!("Loaded {} tracked tools from {}", file.tools.len(), path.display());
    Ok(file)
}
