//! Inbound protocol callbacks (OS-level URI activation).
//!
//! Every payload is untrusted. Anything that fails to decode is logged and
//! dropped here; nothing downstream ever sees it.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;
use strum::{Display, EnumString};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{AccessError, Result};
use crate::stores::sso_auth::OAuthCallback;

/// Routes recognized at the end of the activation URI path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DeepLinkRoute {
    #[strum(serialize = "activate-cluster")]
    ActivateCluster,
    #[strum(serialize = "add-clusters")]
    AddClusters,
    #[strum(serialize = "kubeconfig")]
    KubeConfig,
    #[strum(serialize = "oauth/code")]
    OAuthCode,
}

/// Decoded deep-link event.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtEvent {
    ActivateCluster {
        endpoint: String,
        namespace: String,
        cluster_name: String,
        cluster_id: String,
    },
    AddClusters {
        endpoint: String,
        username: String,
        tokens: serde_json::Value,
    },
    KubeConfig {
        endpoint: String,
        namespace: String,
        cluster_name: String,
        cluster_id: String,
        kube_config: serde_json::Value,
    },
    OAuthCode(OAuthCallback),
}

/// Receiver of decoded events.
pub type EventSink = Arc<dyn Fn(ExtEvent) + Send + Sync>;

/// Decodes activation URIs and forwards the resulting events.
///
/// # Example
/// ```
/// use cluster_access::deep_link::{DeepLinkDispatcher, ExtEvent};
///
/// let (dispatcher, mut events) = DeepLinkDispatcher::channel();
/// assert!(dispatcher.dispatch_uri("lens://app/oauth/code?code=abc&state=xyz"));
/// assert!(matches!(events.try_recv(), Ok(ExtEvent::OAuthCode(_))));
/// ```
#[derive(Clone)]
pub struct DeepLinkDispatcher {
    sink: EventSink,
}

impl DeepLinkDispatcher {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(ExtEvent) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Dispatcher feeding an unbounded channel, for hosts that drain events
    /// from an async loop.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExtEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self::new(move |event| {
            if tx.send(event).is_err() {
                debug!("deep-link receiver dropped, event discarded");
            }
        });
        (dispatcher, rx)
    }

    /// Decode and forward one activation URI. Returns `false` when the URI
    /// was dropped.
    pub fn dispatch_uri(&self, uri: &str) -> bool {
        let url = match Url::parse(uri) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "dropping unparseable deep link");
                return false;
            }
        };
        let route = match route_of(&url) {
            Ok(route) => route,
            Err(e) => {
                error!(error = %e, "dropping deep link with unknown route");
                return false;
            }
        };
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        self.dispatch(route, &params)
    }

    /// Decode and forward an already-routed callback.
    pub fn dispatch(&self, route: DeepLinkRoute, params: &HashMap<String, String>) -> bool {
        match decode_event(route, params) {
            Ok(event) => {
                debug!(%route, "dispatching deep-link event");
                (self.sink)(event);
                true
            }
            Err(e) => {
                error!(%route, error = %e, "failed to decode deep link, dropping");
                false
            }
        }
    }
}

fn route_of(url: &Url) -> Result<DeepLinkRoute> {
    let segments: Vec<&str> = url
        .host_str()
        .into_iter()
        .chain(url.path().split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    match segments.as_slice() {
        [.., "oauth", "code"] => Ok(DeepLinkRoute::OAuthCode),
        [.., last] => last
            .parse()
            .map_err(|_| AccessError::Decode(format!("unknown route {last:?}"))),
        [] => Err(AccessError::Decode("deep link has no route".to_string())),
    }
}

fn decode_event(route: DeepLinkRoute, params: &HashMap<String, String>) -> Result<ExtEvent> {
    Ok(match route {
        DeepLinkRoute::ActivateCluster => ExtEvent::ActivateCluster {
            endpoint: required(params, "cloudUrl")?,
            namespace: required(params, "namespace")?,
            cluster_name: required(params, "clusterName")?,
            cluster_id: required(params, "clusterId")?,
        },
        DeepLinkRoute::AddClusters => ExtEvent::AddClusters {
            endpoint: required(params, "cloudUrl")?,
            username: required(params, "username")?,
            tokens: decode_payload(&required(params, "tokens")?)?,
        },
        DeepLinkRoute::KubeConfig => ExtEvent::KubeConfig {
            endpoint: required(params, "cloudUrl")?,
            namespace: required(params, "namespace")?,
            cluster_name: required(params, "clusterName")?,
            cluster_id: required(params, "clusterId")?,
            kube_config: decode_payload(&required(params, "kubeConfig")?)?,
        },
        DeepLinkRoute::OAuthCode => ExtEvent::OAuthCode(OAuthCallback {
            code: optional(params, "code"),
            state: optional(params, "state"),
            error: optional(params, "error"),
            error_description: optional(params, "error_description"),
        }),
    })
}

/// Base64 JSON bulk payload.
pub fn decode_payload(raw: &str) -> Result<serde_json::Value> {
    // query decoding turns '+' into ' '
    let normalized: String = raw.trim().replace(' ', "+");
    let bytes = STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| AccessError::Decode(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| AccessError::Decode(format!("invalid JSON: {e}")))
}

fn required(params: &HashMap<String, String>, key: &str) -> Result<String> {
    optional(params, key).ok_or_else(|| AccessError::Decode(format!("missing parameter {key}")))
}

fn optional(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params.get(key).filter(|value| !value.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encoded(value: serde_json::Value) -> String {
        STANDARD.encode(value.to_string())
    }

    #[test]
    fn activate_cluster_decodes_all_fields() {
        let (dispatcher, mut rx) = DeepLinkDispatcher::channel();
        let uri = "lens://extension/cluster-access/activate-cluster\
                   ?cloudUrl=https%3A%2F%2Fmcc.example.com&namespace=ns1&clusterName=c1&clusterId=42";
        assert!(dispatcher.dispatch_uri(uri));
        assert_eq!(
            rx.try_recv().unwrap(),
            ExtEvent::ActivateCluster {
                endpoint: "https://mcc.example.com".to_string(),
                namespace: "ns1".to_string(),
                cluster_name: "c1".to_string(),
                cluster_id: "42".to_string(),
            }
        );
    }

    #[test]
    fn add_clusters_decodes_token_payload() {
        let (dispatcher, mut rx) = DeepLinkDispatcher::channel();
        let tokens = serde_json::json!({"id_token": "x", "refresh_token": "y"});
        let mut params = HashMap::new();
        params.insert("cloudUrl".to_string(), "https://mcc.example.com".to_string());
        params.insert("username".to_string(), "writer".to_string());
        params.insert("tokens".to_string(), encoded(tokens.clone()));

        assert!(dispatcher.dispatch(DeepLinkRoute::AddClusters, &params));
        match rx.try_recv().unwrap() {
            ExtEvent::AddClusters { username, tokens: decoded, .. } => {
                assert_eq!(username, "writer");
                assert_eq!(decoded, tokens);
            }
            other => panic!("expected AddClusters, got {other:?}"),
        }
    }

    #[test]
    fn malformed_base64_is_dropped() {
        let (dispatcher, mut rx) = DeepLinkDispatcher::channel();
        let mut params = HashMap::new();
        params.insert("cloudUrl".to_string(), "https://mcc.example.com".to_string());
        params.insert("username".to_string(), "writer".to_string());
        params.insert("tokens".to_string(), "!!notbase64!!".to_string());

        assert!(!dispatcher.dispatch(DeepLinkRoute::AddClusters, &params));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_json_kubeconfig_is_dropped() {
        let (dispatcher, mut rx) = DeepLinkDispatcher::channel();
        let uri = format!(
            "lens://app/kubeconfig?cloudUrl=x&namespace=n&clusterName=c&clusterId=i&kubeConfig={}",
            STANDARD.encode("{not json")
        );
        assert!(!dispatcher.dispatch_uri(&uri));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn plus_signs_survive_query_decoding() {
        // bytes chosen so the standard alphabet produces '+'
        let value = serde_json::json!({"k": "~~~"});
        let raw = encoded(value.clone());
        assert!(raw.contains('+'));
        assert_eq!(decode_payload(&raw.replace('+', " ")).unwrap(), value);
    }

    #[test]
    fn oauth_callback_carries_error_fields() {
        let (dispatcher, mut rx) = DeepLinkDispatcher::channel();
        assert!(dispatcher.dispatch_uri(
            "lens://app/oauth/code?error=access_denied&error_description=nope&state=s1"
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            ExtEvent::OAuthCode(OAuthCallback {
                code: None,
                state: Some("s1".to_string()),
                error: Some("access_denied".to_string()),
                error_description: Some("nope".to_string()),
            })
        );
    }

    #[test]
    fn unknown_routes_and_missing_params_are_dropped() {
        let (dispatcher, mut rx) = DeepLinkDispatcher::channel();
        assert!(!dispatcher.dispatch_uri("lens://app/delete-everything"));
        assert!(!dispatcher.dispatch_uri("lens://app/activate-cluster?cloudUrl=x"));
        assert!(!dispatcher.dispatch_uri("not a uri"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn oauth_route_requires_whole_segments() {
        let (dispatcher, mut rx) = DeepLinkDispatcher::channel();
        assert!(!dispatcher.dispatch_uri("lens://app/xoauth/code?code=abc"));
        assert!(!dispatcher.dispatch_uri("lens://app/oauth-code?code=abc"));
        assert!(rx.try_recv().is_err());

        assert!(dispatcher.dispatch_uri("lens://oauth/code/?code=abc"));
        assert_eq!(
            rx.try_recv().unwrap(),
            ExtEvent::OAuthCode(OAuthCallback::with_code("abc"))
        );
    }
}
