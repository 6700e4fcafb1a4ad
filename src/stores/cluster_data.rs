//! Cluster inventory fetch.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AccessError, Result};
use crate::net::join_url;
use crate::oidc::OidcClient;
use crate::session::{Session, TokenSet};
use crate::store::AsyncStore;
use crate::stores::config::ConfigDescriptor;

const NAMESPACES_PATH: &str = "api/v1/namespaces";
const CLUSTERS_API: &str = "apis/cluster.k8s.io/v1alpha1";

/// One cluster as listed by the management endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub created: Option<DateTime<Utc>>,
    pub ready: bool,
}

/// Clusters of one namespace, or why they could not be listed.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceClusters {
    pub namespace: String,
    pub result: std::result::Result<Vec<ClusterSummary>, AccessError>,
}

/// Inventory with per-namespace success or failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterDataset {
    pub namespaces: Vec<NamespaceClusters>,
}

impl ClusterDataset {
    pub fn clusters(&self) -> impl Iterator<Item = &ClusterSummary> {
        self.namespaces
            .iter()
            .filter_map(|ns| ns.result.as_ref().ok())
            .flatten()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &AccessError)> {
        self.namespaces
            .iter()
            .filter_map(|ns| ns.result.as_ref().err().map(|e| (ns.namespace.as_str(), e)))
    }

    /// Every namespace was enumerated.
    pub fn is_complete(&self) -> bool {
        self.namespaces.iter().all(|ns| ns.result.is_ok())
    }
}

enum Credentials {
    Bearer(String),
    Basic { username: String, password: String },
}

impl Credentials {
    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Bearer(token) => builder.bearer_auth(token),
            Self::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }
}

/// Store holding the inventory of the current endpoint.
pub struct ClusterDataStore {
    store: AsyncStore<ClusterDataset>,
    client: reqwest::Client,
    oidc: OidcClient,
}

impl ClusterDataStore {
    pub fn new(client: reqwest::Client, oidc: OidcClient) -> Self {
        Self {
            store: AsyncStore::new("cluster-data"),
            client,
            oidc,
        }
    }

    pub fn state(&self) -> &AsyncStore<ClusterDataset> {
        &self.store
    }

    /// Fetch the inventory with the session's credentials. Expired access
    /// tokens are refreshed first and written back on commit.
    pub async fn load(
        &self,
        endpoint: &str,
        config: &ConfigDescriptor,
        session: &mut Session,
    ) -> bool {
        let Some(ticket) = self.store.begin() else {
            return false;
        };
        info!(endpoint, "loading cluster data");

        match self.fetch(endpoint, config, session).await {
            Ok((dataset, refreshed)) => {
                if !dataset.is_complete() {
                    warn!(
                        endpoint,
                        failed = dataset.failures().count(),
                        "some namespaces could not be enumerated"
                    );
                }
                self.store.commit(ticket, Ok(dataset), |_| {
                    if let Some(tokens) = refreshed {
                        session.update_tokens(tokens);
                    }
                })
            }
            Err(e) => {
                warn!(endpoint, error = %e, "cluster data load failed");
                self.store.finish(ticket, Err(e))
            }
        }
    }

    pub fn reset(&self) -> Result<()> {
        self.store.reset()
    }

    async fn fetch(
        &self,
        endpoint: &str,
        config: &ConfigDescriptor,
        session: &Session,
    ) -> Result<(ClusterDataset, Option<TokenSet>)> {
        let (credentials, refreshed) = self.credentials(config, session).await?;

        let namespaces: List<NamespaceItem> = self
            .get_json(&join_url(endpoint, NAMESPACES_PATH), &credentials)
            .await?;
        let names: Vec<String> = namespaces
            .items
            .into_iter()
            .map(|item| item.metadata.name)
            .collect();
        debug!(endpoint, count = names.len(), "namespaces listed");

        let lists = names
            .iter()
            .map(|ns| self.list_clusters(endpoint, ns, &credentials));
        let namespaces = names
            .iter()
            .cloned()
            .zip(join_all(lists).await)
            .map(|(namespace, result)| NamespaceClusters { namespace, result })
            .collect();

        Ok((ClusterDataset { namespaces }, refreshed))
    }

    async fn credentials(
        &self,
        config: &ConfigDescriptor,
        session: &Session,
    ) -> Result<(Credentials, Option<TokenSet>)> {
        if let Some(tokens) = &session.tokens {
            let now = Utc::now();
            if tokens.is_expired_at(now) && tokens.can_refresh_at(now) {
                if let Some(refresh_token) = tokens.refresh_token.as_deref() {
                    debug!("access token expired, refreshing");
                    let refreshed = self
                        .oidc
                        .refresh_grant(config.issuer()?, refresh_token)
                        .await?;
                    return Ok((
                        Credentials::Bearer(refreshed.access_token.clone()),
                        Some(refreshed),
                    ));
                }
            }
            return Ok((Credentials::Bearer(tokens.access_token.clone()), None));
        }
        match (&session.username, &session.password) {
            (Some(username), Some(password)) => Ok((
                Credentials::Basic {
                    username: username.clone(),
                    password: password.clone(),
                },
                None,
            )),
            _ => Err(AccessError::Credential(
                "session has no credentials".to_string(),
            )),
        }
    }

    async fn list_clusters(
        &self,
        endpoint: &str,
        namespace: &str,
        credentials: &Credentials,
    ) -> Result<Vec<ClusterSummary>> {
        let url = join_url(
            endpoint,
            &format!("{CLUSTERS_API}/namespaces/{namespace}/clusters"),
        );
        let list: List<ClusterItem> = self.get_json(&url, credentials).await?;
        Ok(list
            .items
            .into_iter()
            .map(|item| ClusterSummary {
                id: item.metadata.uid.unwrap_or_default(),
                name: item.metadata.name,
                namespace: item
                    .metadata
                    .namespace
                    .unwrap_or_else(|| namespace.to_string()),
                created: item.metadata.creation_timestamp,
                ready: item
                    .status
                    .and_then(|s| s.provider_status)
                    .map(|p| p.ready)
                    .unwrap_or(false),
            })
            .collect())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, credentials: &Credentials) -> Result<T> {
        let resp = credentials
            .apply(self.client.get(url).header("Accept", "application/json"))
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AccessError::Credential(format!(
                "inventory request rejected with status {status}"
            )));
        }
        if !status.is_success() {
            return Err(AccessError::Network(format!(
                "inventory request failed with status {status}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| AccessError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NamespaceItem {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ClusterItem {
    metadata: ObjectMeta,
    status: Option<ClusterStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    namespace: Option<String>,
    uid: Option<String>,
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterStatus {
    provider_status: Option<ProviderStatus>,
}

#[derive(Debug, Deserialize)]
struct ProviderStatus {
    #[serde(default)]
    ready: bool,
}
