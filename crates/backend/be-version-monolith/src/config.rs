use std::{net::SocketAddr, path::PathBuf, time::Duration};

use be_version_service::UpdaterConfig;

use crate::error::{MonolithError, Result};

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_TOOLS_CONFIG_PATH: &str = "config/tools.toml";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 600;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STALE_THRESHOLD_SECS: u64 = 900;

/// Configuration for running the version registry server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// When false only the query service runs; documents are served as found on disk.
    pub scheduler_enabled: bool,
    pub tools_config_path: PathBuf,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub stale_threshold: Duration,
    pub update_info_url: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut http_addr = var("HTTP_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| MonolithError::Config(format!("invalid HTTP_ADDR: {}", e)))?;

        if let Some(port) = var("PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|e| MonolithError::Config(format!("invalid PORT '{}': {}", port, e)))?;
            http_addr.set_port(port);
        }

        let scheduler_disabled = match var("DISABLE_SCHEDULER") {
            Some(value) => parse_bool("DISABLE_SCHEDULER", &value)?,
            None => false,
        };

        Ok(Self {
            http_addr,
            data_dir: var("DATA_DIR")
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
                .into(),
            scheduler_enabled: !scheduler_disabled,
            tools_config_path: var("TOOLS_CONFIG_PATH")
                .unwrap_or_else(|| DEFAULT_TOOLS_CONFIG_PATH.to_string())
                .into(),
            refresh_interval: seconds(
                "REFRESH_INTERVAL_SECS",
                var("REFRESH_INTERVAL_SECS"),
                DEFAULT_REFRESH_INTERVAL_SECS,
            )?,
            fetch_timeout: seconds(
                "FETCH_TIMEOUT_SECS",
                var("FETCH_TIMEOUT_SECS"),
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?,
            stale_threshold: seconds(
                "STALE_THRESHOLD_SECS",
                var("STALE_THRESHOLD_SECS"),
                DEFAULT_STALE_THRESHOLD_SECS,
            )?,
            update_info_url: var("UPDATE_INFO_URL"),
        })
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            refresh_interval: self.refresh_interval,
            fetch_timeout: self.fetch_timeout,
            stale_threshold: self.stale_threshold,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(MonolithError::Config(format!(
            "{} must be true or false, got '{}'",
            key, value
        ))),
    }
}

fn seconds(key: &str, value: Option<String>, default: u64) -> Result<Duration> {
    let secs = match value {
        Some(value) => value
            .parse::<u64>()
            .map_err(|e| MonolithError::Config(format!("invalid {} '{}': {}", key, value, e)))?,
        None => default,
    };
    if secs == 0 {
        return Err(MonolithError::Config(format!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(config.scheduler_enabled);
        assert_eq!(config.tools_config_path, PathBuf::from("config/tools.toml"));
        assert_eq!(config.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.stale_threshold, Duration::from_secs(900));
        assert_eq!(config.update_info_url, None);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("HTTP_ADDR", "127.0.0.1:8080"),
            ("PORT", "9090"),
            ("DATA_DIR", "/var/lib/registry"),
            ("DISABLE_SCHEDULER", "TRUE"),
            ("REFRESH_INTERVAL_SECS", "60"),
            ("UPDATE_INFO_URL", "https://example.com/update.json"),
        ])
        .unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:9090".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/registry"));
        assert!(!config.scheduler_enabled);
        assert_eq!(config.updater_config().refresh_interval, Duration::from_secs(60));
        assert_eq!(
            config.update_info_url.as_deref(),
            Some("https://example.com/update.json")
        );
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = config_from(&[("DATA_DIR", "  "), ("UPDATE_INFO_URL", "")]).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.update_info_url, None);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            config_from(&[("PORT", "http")]),
            Err(MonolithError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("DISABLE_SCHEDULER", "maybe")]),
            Err(MonolithError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("REFRESH_INTERVAL_SECS", "0")]),
            Err(MonolithError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("HTTP_ADDR", "localhost")]),
            Err(MonolithError::Config(_))
        ));
    }
}
