//! Ambient settings (layered: code > env > defaults).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AccessError, Result};

/// OAuth client identifier registered with the identity provider.
pub const DEFAULT_CLIENT_ID: &str = "lens";
/// Protocol URI the identity provider redirects to after authorization.
pub const DEFAULT_REDIRECT_URI: &str = "lens://extension/cluster-access/oauth/code";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings shared by every store.
///
/// Resolution order:
/// 1. Explicit `with_*` overrides
/// 2. Environment variables (`CLUSTER_ACCESS_*`, `.env` honored)
/// 3. Built-in defaults
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub request_timeout: Duration,
    pub preferences_dir: PathBuf,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessConfig {
    pub fn new() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            preferences_dir: default_home_dir(),
        }
    }

    /// Load overrides from environment variables.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::new();

        if let Ok(client_id) = std::env::var("CLUSTER_ACCESS_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Ok(uri) = std::env::var("CLUSTER_ACCESS_REDIRECT_URI") {
            config.redirect_uri = uri;
        }
        if let Ok(raw) = std::env::var("CLUSTER_ACCESS_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.request_timeout = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid CLUSTER_ACCESS_TIMEOUT_SECS"),
            }
        }
        if let Some(home) = std::env::var_os("CLUSTER_ACCESS_HOME") {
            let path = PathBuf::from(home);
            if !path.as_os_str().is_empty() {
                config.preferences_dir = path;
            }
        }

        config
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_preferences_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preferences_dir = dir.into();
        self
    }

    /// HTTP client used for every outbound request.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| AccessError::Config(format!("failed to build HTTP client: {e}")))
    }
}

fn default_home_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".cluster-access"))
        .unwrap_or_else(|| PathBuf::from(".cluster-access"))
}
