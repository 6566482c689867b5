//! Configuration-driven HTTP adapter for the version fetcher contract

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use be_version_service::{FetchError, UpdateInfo, UpdateInfoSource, VersionFetcher};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{error::Result, tools::ToolSource};

const USER_AGENT: &str = concat!("be-version-monolith/", env!("CARGO_PKG_VERSION"));

/// Reads one string out of a JSON document per tool.
pub struct HttpFetcher {
    client: reqwest::Client,
    sources: HashMap<String, ToolSource>,
    update_info_url: Option<String>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(
        sources: &[ToolSource],
        update_info_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        let mut by_id: HashMap<String, ToolSource> = HashMap::with_capacity(sources.len());
        for source in sources {
            by_id
                .entry(source.id.clone())
                .or_insert_with(|| source.clone());
        }

        Ok(Self {
            client,
            sources: by_id,
            update_info_url,
            timeout,
        })
    }

    async fn get_json(&self, url: &str) -> std::result::Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Upstream(format!("HTTP {} from {}", status, url)));
        }

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    fn request_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Upstream(e.to_string())
        }
    }
}

#[async_trait]
impl VersionFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, tool_id: &str) -> std::result::Result<String, FetchError> {
        let source = self
            .sources
            .get(tool_id)
            .ok_or_else(|| FetchError::UnknownTool(tool_id.to_string()))?;

        debug!("Fetching {} from {}", tool_id, source.url);
        let document = self.get_json(&source.url).await?;
        extract_version(&document, &source.pointer, source.strip_prefix.as_deref())
    }
}

#[async_trait]
impl UpdateInfoSource for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch_update_info(&self) -> std::result::Result<UpdateInfo, FetchError> {
        let url = self
            .update_info_url
            .as_deref()
            .ok_or_else(|| FetchError::Upstream("no update document URL configured".to_string()))?;

        let document = self.get_json(url).await?;
        serde_json::from_value(document).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

/// Read the version at `pointer`. Strings are trimmed, numbers are accepted
/// as written, anything else is malformed.
pub fn extract_version(
    document: &Value,
    pointer: &str,
    strip_prefix: Option<&str>,
) -> std::result::Result<String, FetchError> {
    let version = match document.pointer(pointer) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "expected a string at '{}', found {}",
                pointer, other
            )));
        }
        None => {
            return Err(FetchError::Malformed(format!(
                "no value at '{}'",
                pointer
            )));
        }
    };

    let version = match strip_prefix {
        Some(prefix) => version
            .strip_prefix(prefix)
            .map(str::to_string)
            .unwrap_or(version),
        None => version,
    };

    if version.is_empty() {
        return Err(FetchError::Malformed(format!(
            "empty version at '{}'",
            pointer
        )));
    }
    Ok(version)
}
