//! Remote capability discovery.

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AccessError, Result};
use crate::net::join_url;
use crate::oidc::IssuerMetadata;
use crate::store::AsyncStore;

const CONFIG_PATH: &str = "config.js";

/// Capability record published by a management endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDescriptor {
    /// Whether the endpoint requires single sign-on.
    #[serde(default)]
    pub keycloak_login: bool,
    #[serde(default)]
    pub keycloak: Option<IssuerMetadata>,
}

impl ConfigDescriptor {
    pub fn sso_required(&self) -> bool {
        self.keycloak_login
    }

    pub fn issuer(&self) -> Result<&IssuerMetadata> {
        self.keycloak
            .as_ref()
            .ok_or_else(|| AccessError::Config("descriptor has no issuer metadata".into()))
    }
}

/// Parse a descriptor served either as bare JSON or as a
/// `window.CONFIG = {...};` script.
pub fn parse_descriptor(body: &str) -> Result<ConfigDescriptor> {
    let trimmed = body.trim();
    let start = trimmed
        .find('{')
        .ok_or_else(|| AccessError::Config("descriptor contains no object".into()))?;
    let end = trimmed
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| AccessError::Config("descriptor object is not terminated".into()))?;
    serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| AccessError::Config(format!("malformed descriptor: {e}")))
}

/// Store holding the descriptor of the currently selected endpoint.
pub struct ConfigStore {
    store: AsyncStore<ConfigDescriptor>,
    client: reqwest::Client,
}

impl ConfigStore {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            store: AsyncStore::new("config"),
            client,
        }
    }

    pub fn state(&self) -> &AsyncStore<ConfigDescriptor> {
        &self.store
    }

    /// Descriptor of the last successful load, if any.
    pub fn descriptor(&self) -> Option<ConfigDescriptor> {
        let state = self.store.snapshot();
        if state.succeeded() {
            state.data
        } else {
            None
        }
    }

    /// Fetch the descriptor for `endpoint`. No retry; the caller decides.
    pub async fn load(&self, endpoint: &str) -> bool {
        info!(endpoint, "loading endpoint config");
        self.store
            .load(fetch_descriptor(&self.client, endpoint))
            .await
    }

    pub fn reset(&self) -> Result<()> {
        self.store.reset()
    }
}

async fn fetch_descriptor(client: &reqwest::Client, endpoint: &str) -> Result<ConfigDescriptor> {
    let resp = client.get(join_url(endpoint, CONFIG_PATH)).send().await?;
    let status = resp.status();
    if !status.is_success() {
        warn!(endpoint, %status, "config request failed");
        return Err(AccessError::Config(format!(
            "config request failed with status {status}"
        )));
    }
    let body = resp.text().await?;
    parse_descriptor(&body)
}
