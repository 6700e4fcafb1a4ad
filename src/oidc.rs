//! OpenID Connect client for the endpoint's identity provider.
//!
//! Identity tokens are decoded, not verified: they arrive over a channel the
//! console already authenticated.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::AccessConfig;
use crate::error::{AccessError, Result};
use crate::session::TokenSet;

/// Issuer metadata advertised by the endpoint's config descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerMetadata {
    pub url: String,
    pub realm: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl IssuerMetadata {
    pub fn realm_url(&self) -> String {
        format!("{}/realms/{}", self.url.trim_end_matches('/'), self.realm)
    }

    pub fn authorization_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/auth", self.realm_url())
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.realm_url())
    }
}

/// Browser-facing half of an authorization-code attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Claims read from an identity token payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub sub: Option<String>,
}

/// Token-endpoint client for the three grants the console uses.
#[derive(Debug, Clone)]
pub struct OidcClient {
    client: reqwest::Client,
    client_id: String,
    redirect_uri: String,
}

impl OidcClient {
    pub fn new(client: reqwest::Client, config: &AccessConfig) -> Self {
        Self {
            client,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn client_id<'a>(&'a self, issuer: &'a IssuerMetadata) -> &'a str {
        issuer.client_id.as_deref().unwrap_or(&self.client_id)
    }

    /// Build the authorization URL with a fresh anti-forgery state and PKCE
    /// verifier.
    pub fn authorization_request(&self, issuer: &IssuerMetadata) -> Result<AuthorizationRequest> {
        let state = random_hex(16);
        let code_verifier = generate_code_verifier();
        let code_challenge = compute_code_challenge(&code_verifier);

        let params = [
            ("client_id", self.client_id(issuer)),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", "openid"),
            ("state", state.as_str()),
            ("code_challenge", code_challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        let url = Url::parse_with_params(&issuer.authorization_endpoint(), &params)
            .map_err(|e| AccessError::Config(format!("invalid issuer url: {e}")))?;

        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
        })
    }

    /// Resource-owner password grant.
    pub async fn password_grant(
        &self,
        issuer: &IssuerMetadata,
        username: &str,
        password: &str,
    ) -> Result<TokenSet> {
        let resp = self
            .client
            .post(issuer.token_endpoint())
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.client_id(issuer)),
                ("scope", "openid"),
                ("username", username),
                ("password", password),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return token_set_from_response(resp).await;
        }
        let detail = token_error_detail(resp).await;
        if status == StatusCode::UNAUTHORIZED || detail.starts_with("invalid_grant") {
            return Err(AccessError::Credential(detail));
        }
        Err(AccessError::Network(format!(
            "password grant failed with status {status}: {detail}"
        )))
    }

    /// Exchange an authorization code for tokens.
    pub async fn authorization_code_grant(
        &self,
        issuer: &IssuerMetadata,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenSet> {
        let resp = self
            .client
            .post(issuer.token_endpoint())
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.client_id(issuer)),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return token_set_from_response(resp).await;
        }
        let detail = token_error_detail(resp).await;
        Err(AccessError::AuthCode(format!(
            "code exchange failed with status {status}: {detail}"
        )))
    }

    pub async fn refresh_grant(
        &self,
        issuer: &IssuerMetadata,
        refresh_token: &str,
    ) -> Result<TokenSet> {
        let resp = self
            .client
            .post(issuer.token_endpoint())
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id(issuer)),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return token_set_from_response(resp).await;
        }
        let detail = token_error_detail(resp).await;
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(AccessError::Credential(format!(
                "refresh token rejected: {detail}"
            )));
        }
        Err(AccessError::Network(format!(
            "token refresh failed with status {status}"
        )))
    }
}

/// Decode the payload segment of a JWT without checking its signature.
pub fn decode_id_token_claims(token: &str) -> Result<IdTokenClaims> {
    let mut parts = token.split('.');
    let _header = parts
        .next()
        .ok_or_else(|| AccessError::Decode("identity token missing header".into()))?;
    let payload = parts
        .next()
        .ok_or_else(|| AccessError::Decode("identity token missing payload".into()))?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AccessError::Decode("identity token payload encoding".into()))?;
    serde_json::from_slice(&decoded)
        .map_err(|_| AccessError::Decode("identity token payload JSON".into()))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
    refresh_expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

async fn token_set_from_response(resp: reqwest::Response) -> Result<TokenSet> {
    let payload: TokenResponse = resp
        .json()
        .await
        .map_err(|e| AccessError::InvalidResponse(format!("token response: {e}")))?;
    Ok(token_set_from_payload(payload, Utc::now()))
}

fn token_set_from_payload(payload: TokenResponse, now: DateTime<Utc>) -> TokenSet {
    // keycloak reports 0 for refresh tokens that never expire
    let offset = |secs: Option<i64>| {
        secs.filter(|s| *s > 0)
            .map(|s| now + Duration::seconds(s))
    };
    TokenSet {
        access_token: payload.access_token,
        refresh_token: payload.refresh_token,
        id_token: payload.id_token,
        expires_at: offset(payload.expires_in),
        refresh_expires_at: offset(payload.refresh_expires_in),
    }
}

async fn token_error_detail(resp: reqwest::Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<TokenErrorResponse>(&body) {
        Ok(err) => match err.error_description {
            Some(description) => format!("{}: {description}", err.error),
            None => err.error,
        },
        Err(_) => "unknown".to_string(),
    }
}

fn random_hex(byte_count: usize) -> String {
    let mut buf = vec![0u8; byte_count];
    for chunk in buf.chunks_mut(16) {
        let id = uuid::Uuid::new_v4();
        let len = chunk.len();
        chunk.copy_from_slice(&id.as_bytes()[..len]);
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

fn generate_code_verifier() -> String {
    let mut buf = [0u8; 32];
    for chunk in buf.chunks_mut(16) {
        chunk.copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    }
    URL_SAFE_NO_PAD.encode(buf)
}

fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn issuer() -> IssuerMetadata {
        IssuerMetadata {
            url: "https://idp.example.com/auth/".to_string(),
            realm: "iam".to_string(),
            client_id: None,
        }
    }

    fn jwt(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn endpoints_derive_from_realm() {
        let issuer = issuer();
        assert_eq!(
            issuer.token_endpoint(),
            "https://idp.example.com/auth/realms/iam/protocol/openid-connect/token"
        );
        assert_eq!(
            issuer.authorization_endpoint(),
            "https://idp.example.com/auth/realms/iam/protocol/openid-connect/auth"
        );
    }

    #[test]
    fn authorization_request_carries_state_and_challenge() {
        let client = OidcClient::new(reqwest::Client::new(), &AccessConfig::new());
        let request = client.authorization_request(&issuer()).unwrap();
        let url = Url::parse(&request.url).unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], crate::config::DEFAULT_CLIENT_ID);
        assert_eq!(params["state"], request.state);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(
            params["code_challenge"],
            compute_code_challenge(&request.code_verifier)
        );
        assert_eq!(request.state.len(), 32);
    }

    #[test]
    fn states_are_unique_per_attempt() {
        let client = OidcClient::new(reqwest::Client::new(), &AccessConfig::new());
        let a = client.authorization_request(&issuer()).unwrap();
        let b = client.authorization_request(&issuer()).unwrap();
        assert_ne!(a.state, b.state);
        assert_ne!(a.code_verifier, b.code_verifier);
    }

    #[test]
    fn issuer_client_id_overrides_default() {
        let client = OidcClient::new(reqwest::Client::new(), &AccessConfig::new());
        let mut issuer = issuer();
        issuer.client_id = Some("kaas".to_string());
        let request = client.authorization_request(&issuer).unwrap();
        assert!(request.url.contains("client_id=kaas"));
    }

    #[test]
    fn decodes_preferred_username_without_verification() {
        let token = jwt(serde_json::json!({"preferred_username": "writer", "sub": "1"}));
        let claims = decode_id_token_claims(&token).unwrap();
        assert_eq!(claims.preferred_username.as_deref(), Some("writer"));
        assert_eq!(claims.sub.as_deref(), Some("1"));
    }

    #[test]
    fn missing_claim_decodes_to_none() {
        let token = jwt(serde_json::json!({"sub": "1"}));
        let claims = decode_id_token_claims(&token).unwrap();
        assert!(claims.preferred_username.is_none());
    }

    #[test]
    fn malformed_tokens_are_decode_errors() {
        assert!(matches!(
            decode_id_token_claims("no-dots"),
            Err(AccessError::Decode(_))
        ));
        assert!(matches!(
            decode_id_token_claims("a.!!!.c"),
            Err(AccessError::Decode(_))
        ));
    }

    #[test]
    fn zero_refresh_expiry_means_no_expiry() {
        let now = Utc::now();
        let tokens = token_set_from_payload(
            TokenResponse {
                access_token: "a".into(),
                refresh_token: Some("r".into()),
                id_token: None,
                expires_in: Some(300),
                refresh_expires_in: Some(0),
            },
            now,
        );
        assert_eq!(tokens.expires_at, Some(now + Duration::seconds(300)));
        assert!(tokens.refresh_expires_at.is_none());
    }
}
