//! Username/password exchange.

use tracing::{info, warn};

use crate::error::Result;
use crate::oidc::OidcClient;
use crate::session::Session;
use crate::store::AsyncStore;
use crate::stores::config::ConfigDescriptor;

/// Store tracking the password grant for basic-auth endpoints.
pub struct BasicAuthStore {
    store: AsyncStore<()>,
    oidc: OidcClient,
}

impl BasicAuthStore {
    pub fn new(oidc: OidcClient) -> Self {
        Self {
            store: AsyncStore::new("basic-auth"),
            oidc,
        }
    }

    pub fn state(&self) -> &AsyncStore<()> {
        &self.store
    }

    /// Exchange credentials for tokens and write them into `session`.
    ///
    /// The session is only touched when the exchange succeeds and is still
    /// the current load. Returns `false` when a load was already in flight.
    pub async fn exchange(
        &self,
        endpoint: &str,
        config: &ConfigDescriptor,
        username: &str,
        password: &str,
        session: &mut Session,
    ) -> bool {
        let Some(ticket) = self.store.begin() else {
            return false;
        };
        info!(endpoint, username, "exchanging credentials");

        let result = match config.issuer() {
            Ok(issuer) => self.oidc.password_grant(issuer, username, password).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(endpoint, username, error = %e, "credential exchange failed");
        }

        let (tokens, result): (_, Result<()>) = match result {
            Ok(tokens) => (Some(tokens), Ok(())),
            Err(e) => (None, Err(e)),
        };
        self.store.commit(ticket, result, |_| {
            session.endpoint = Some(endpoint.to_string());
            session.username = Some(username.to_string());
            session.password = Some(password.to_string());
            session.tokens = tokens;
            session.uses_sso = false;
        })
    }

    pub fn reset(&self) -> Result<()> {
        self.store.reset()
    }
}
