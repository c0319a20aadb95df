//! Backend connection settings.
//!
//! Defaults come from the environment:
//! - `OBSVC_SOURCE_URL` (default `http://localhost:5352`)
//! - `OBSVC_REQUEST_TIMEOUT` seconds per request (default 60)
//! - `OBSVC_WAIT_TIMEOUT` seconds for the wait stage (default 600)
//! - `OBSVC_LISTING_MODE` `path` | `command` (default `path`)
//! - `OBSVC_ARCHITECTURES` comma separated (default `x86_64`)

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_SOURCE_URL: &str = "http://localhost:5352";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 600;

/// Architecture looked up when none is configured.
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

/// Which backend endpoint answers available-binaries lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingMode {
    /// `GET /build/{project}/_availablebinaries?path={project}/{repository}`
    #[default]
    PathListing,
    /// `POST /_command?prpa={project}/{repository}/{arch}&cmd=availablebinaries`
    CommandListing,
}

impl FromStr for ListingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "path" | "path_listing" => Ok(ListingMode::PathListing),
            "command" | "command_listing" => Ok(ListingMode::CommandListing),
            other => Err(format!("unknown listing mode: {other}")),
        }
    }
}

/// Source backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the source backend
    pub source_url: String,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Per-request timeout for run, merge and lookups
    pub request_timeout_secs: u64,
    /// Upper bound for the wait stage
    pub wait_timeout_secs: u64,
    /// Binary listing adapter
    pub listing_mode: ListingMode,
    /// Architectures queried when resolving image packages
    pub lookup_architectures: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            source_url: std::env::var("OBSVC_SOURCE_URL")
                .unwrap_or_else(|_| DEFAULT_SOURCE_URL.to_string()),
            user_agent: format!("obsvc/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: env_secs("OBSVC_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS),
            wait_timeout_secs: env_secs("OBSVC_WAIT_TIMEOUT", DEFAULT_WAIT_TIMEOUT_SECS),
            listing_mode: std::env::var("OBSVC_LISTING_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            lookup_architectures: std::env::var("OBSVC_ARCHITECTURES")
                .map(|v| parse_architectures(&v))
                .ok()
                .filter(|archs| !archs.is_empty())
                .unwrap_or_else(|| vec![DEFAULT_ARCHITECTURE.to_string()]),
        }
    }
}

impl BackendConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific backend
    pub fn new(source_url: &str) -> Self {
        BackendConfig {
            source_url: source_url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_listing_mode(mut self, mode: ListingMode) -> Self {
        self.listing_mode = mode;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_architectures<I, S>(mut self, archs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lookup_architectures = archs.into_iter().map(Into::into).collect();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

fn env_secs(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Split a comma separated architecture list, dropping blanks.
pub fn parse_architectures(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_default() {
        let config = BackendConfig::default();
        assert!(!config.source_url.is_empty());
        assert!(!config.lookup_architectures.is_empty());
        assert!(config.user_agent.starts_with("obsvc/"));
    }

    #[test]
    fn test_backend_config_builders() {
        let config = BackendConfig::new("https://backend.example.com")
            .with_listing_mode(ListingMode::CommandListing)
            .with_wait_timeout(Duration::from_secs(5))
            .with_architectures(["x86_64", "aarch64"]);
        assert_eq!(config.source_url, "https://backend.example.com");
        assert_eq!(config.listing_mode, ListingMode::CommandListing);
        assert_eq!(config.wait_timeout(), Duration::from_secs(5));
        assert_eq!(config.lookup_architectures, vec!["x86_64", "aarch64"]);
    }

    #[test]
    fn test_listing_mode_from_str() {
        assert_eq!("path".parse::<ListingMode>(), Ok(ListingMode::PathListing));
        assert_eq!(
            "Command".parse::<ListingMode>(),
            Ok(ListingMode::CommandListing)
        );
        assert!("xml".parse::<ListingMode>().is_err());
    }

    #[test]
    fn test_parse_architectures_drops_blanks() {
        assert_eq!(
            parse_architectures(" x86_64, ,aarch64,"),
            vec!["x86_64".to_string(), "aarch64".to_string()]
        );
    }
}
