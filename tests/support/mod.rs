#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cluster_access::browser::BrowserLauncher;
use cluster_access::config::AccessConfig;
use cluster_access::error::{AccessError, Result};
use cluster_access::oidc::OidcClient;
use cluster_access::stores::ConfigDescriptor;
use reqwest::Url;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REALM: &str = "iam";
pub const TOKEN_PATH: &str = "/auth/realms/iam/protocol/openid-connect/token";
pub const NAMESPACES_PATH: &str = "/api/v1/namespaces";

/// Records every URL handed to the browser instead of opening it.
#[derive(Default)]
pub struct RecordingLauncher {
    opened: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("launcher lock poisoned").clone()
    }

    /// Query parameter of the most recently opened URL.
    pub fn last_param(&self, name: &str) -> Option<String> {
        let last = self.opened().pop()?;
        let url = Url::parse(&last).expect("launcher received a valid url");
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

impl BrowserLauncher for RecordingLauncher {
    fn open(&self, url: &str) -> Result<()> {
        if self.fail {
            return Err(AccessError::Launch("no browser available".to_string()));
        }
        self.opened
            .lock()
            .expect("launcher lock poisoned")
            .push(url.to_string());
        Ok(())
    }
}

pub fn test_config() -> AccessConfig {
    AccessConfig::new()
        .with_client_id("console")
        .with_request_timeout(Duration::from_secs(5))
}

pub fn oidc_client() -> OidcClient {
    let config = test_config();
    OidcClient::new(config.http_client().expect("http client"), &config)
}

pub fn http_client() -> reqwest::Client {
    test_config().http_client().expect("http client")
}

/// Unsigned JWT with the given claims.
pub fn jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

pub fn descriptor_json(server: &MockServer, sso: bool) -> Value {
    json!({
        "keycloakLogin": sso,
        "keycloak": {
            "url": format!("{}/auth", server.uri()),
            "realm": REALM,
            "clientId": "console"
        }
    })
}

pub fn descriptor(server: &MockServer, sso: bool) -> ConfigDescriptor {
    serde_json::from_value(descriptor_json(server, sso)).expect("descriptor")
}

pub fn token_body(id_token: Option<String>) -> Value {
    json!({
        "access_token": "access-1",
        "refresh_token": "refresh-1",
        "id_token": id_token,
        "expires_in": 300,
        "refresh_expires_in": 1800,
        "token_type": "Bearer"
    })
}

pub async fn mount_config(server: &MockServer, sso: bool, expected: u64) {
    let body = format!("window.CONFIG = {};", descriptor_json(server, sso));
    Mock::given(method("GET"))
        .and(path("/config.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(expected)
        .mount(server)
        .await;
}

pub async fn mount_token(server: &MockServer, body: Value, expected: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected)
        .mount(server)
        .await;
}

/// Namespace listing plus one cluster per namespace.
pub async fn mount_inventory(server: &MockServer, namespaces: &[&str], expected: u64) {
    let items: Vec<Value> = namespaces
        .iter()
        .map(|ns| json!({"metadata": {"name": ns}}))
        .collect();
    Mock::given(method("GET"))
        .and(path(NAMESPACES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": items})))
        .expect(expected)
        .mount(server)
        .await;

    for ns in namespaces {
        mount_clusters(server, ns).await;
    }
}

/// One ready cluster named `{namespace}-cluster`.
pub async fn mount_clusters(server: &MockServer, namespace: &str) {
    Mock::given(method("GET"))
        .and(path(clusters_path(namespace)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "metadata": {
                    "name": format!("{namespace}-cluster"),
                    "namespace": namespace,
                    "uid": format!("uid-{namespace}"),
                    "creationTimestamp": "2026-03-01T10:00:00Z"
                },
                "status": {"providerStatus": {"ready": true}}
            }]
        })))
        .mount(server)
        .await;
}

pub fn clusters_path(namespace: &str) -> String {
    format!("/apis/cluster.k8s.io/v1alpha1/namespaces/{namespace}/clusters")
}
