//! Two-phase single sign-on via the OAuth2 authorization-code flow.
//!
//! Phase one opens the identity provider in the user's browser and returns
//! immediately. Phase two runs when the provider's redirect comes back as a
//! deep link, in any order and possibly more than once; only the first
//! callback for the pending attempt is honored.
//!
//! ```text
//! Idle --start_authorization--> AwaitingExternalRedirect (loading)
//!   AwaitingExternalRedirect --complete_authorization--> Authorized | Error
//! ```
//!
//! There is no timeout on `AwaitingExternalRedirect`. It ends when a callback
//! arrives or when the host calls [`SsoAuthStore::cancel_authorization`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::browser::BrowserLauncher;
use crate::error::{AccessError, Result, SSO_FAILURE_MESSAGE};
use crate::oidc::{decode_id_token_claims, OidcClient};
use crate::session::{Session, TokenSet};
use crate::store::{AsyncStore, LoadTicket};
use crate::stores::config::ConfigDescriptor;

/// Parameters the identity provider appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl OAuthCallback {
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    fn failure_reason(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => "unknown".to_string(),
        }
    }
}

struct PendingAuthorization {
    ticket: LoadTicket,
    state: String,
    code_verifier: String,
}

/// Store driving the external-redirect login.
pub struct SsoAuthStore {
    store: AsyncStore<()>,
    oidc: OidcClient,
    launcher: Arc<dyn BrowserLauncher>,
    pending: Mutex<Option<PendingAuthorization>>,
}

impl SsoAuthStore {
    pub fn new(oidc: OidcClient, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            store: AsyncStore::new("sso-auth"),
            oidc,
            launcher,
            pending: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &AsyncStore<()> {
        &self.store
    }

    /// Waiting for the browser to redirect back.
    pub fn is_awaiting_redirect(&self) -> bool {
        self.store.is_loading() && self.lock_pending().is_some()
    }

    /// Open the authorization URL in the external browser.
    ///
    /// Ignored while an attempt is already in progress. Endpoints that do not
    /// require SSO fail immediately with [`AccessError::BasicOnly`] and no
    /// network activity.
    pub fn start_authorization(&self, config: &ConfigDescriptor) {
        let Some(ticket) = self.store.begin() else {
            debug!("authorization already in progress");
            return;
        };

        if !config.sso_required() {
            info!("endpoint is basic-auth only, not starting SSO");
            self.store.finish(ticket, Err(AccessError::BasicOnly));
            return;
        }

        let request = match config
            .issuer()
            .and_then(|issuer| self.oidc.authorization_request(issuer))
        {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "cannot build authorization request");
                self.store.finish(ticket, Err(e));
                return;
            }
        };

        *self.lock_pending() = Some(PendingAuthorization {
            ticket,
            state: request.state,
            code_verifier: request.code_verifier,
        });

        if let Err(e) = self.launcher.open(&request.url) {
            error!(error = %e, "failed to open authorization page");
            self.lock_pending().take();
            self.store.finish(
                ticket,
                Err(AccessError::AuthCode(SSO_FAILURE_MESSAGE.to_string())),
            );
            return;
        }
        info!("awaiting authorization redirect");
    }

    /// Finish the attempt with the provider's redirect parameters.
    ///
    /// Returns `false` when the callback was ignored: nothing is pending, or
    /// another callback for the same attempt is already being handled. On
    /// success the session's credentials are replaced in one step; on failure
    /// the session is left untouched.
    pub async fn complete_authorization(
        &self,
        callback: &OAuthCallback,
        config: &ConfigDescriptor,
        session: &mut Session,
    ) -> bool {
        if !self.store.is_loading() {
            debug!("ignoring authorization callback, nothing in progress");
            return false;
        }
        let Some(pending) = self.lock_pending().take() else {
            debug!("ignoring duplicate authorization callback");
            return false;
        };
        if !self.store.is_current(pending.ticket) {
            debug!("ignoring authorization callback for an abandoned attempt");
            return false;
        }

        match self.exchange(callback, config, &pending).await {
            Ok((username, tokens)) => {
                info!(username = %username, "single sign-on completed");
                self.store.commit(pending.ticket, Ok(()), |_| {
                    session.password = None;
                    session.username = Some(username);
                    session.tokens = Some(tokens);
                    session.uses_sso = true;
                })
            }
            Err(e) => {
                error!(error = %e, "failed to complete authorization");
                self.store.finish(
                    pending.ticket,
                    Err(AccessError::AuthCode(SSO_FAILURE_MESSAGE.to_string())),
                )
            }
        }
    }

    /// Mark authorized without network activity, for resuming a session
    /// that is already valid.
    pub fn set_authorized(&self) -> Result<()> {
        self.store.mark_loaded()
    }

    pub fn reset(&self) -> Result<()> {
        self.store.reset()?;
        self.lock_pending().take();
        Ok(())
    }

    /// Give up on a pending redirect. A callback arriving afterwards is
    /// ignored and an exchange already in flight is discarded on arrival.
    pub fn cancel_authorization(&self) -> bool {
        if !self.store.is_loading() {
            return false;
        }
        self.lock_pending().take();
        self.store.abandon();
        warn!("pending authorization cancelled");
        true
    }

    async fn exchange(
        &self,
        callback: &OAuthCallback,
        config: &ConfigDescriptor,
        pending: &PendingAuthorization,
    ) -> Result<(String, TokenSet)> {
        if let Some(returned) = callback.state.as_deref() {
            if returned != pending.state {
                return Err(AccessError::AuthCode(format!(
                    "state mismatch, got {returned}"
                )));
            }
        }
        let Some(code) = callback.code.as_deref().filter(|code| !code.is_empty()) else {
            return Err(AccessError::AuthCode(callback.failure_reason()));
        };

        let issuer = config.issuer()?;
        let tokens = self
            .oidc
            .authorization_code_grant(issuer, code, &pending.code_verifier)
            .await?;
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| AccessError::AuthCode("token response has no identity token".into()))?;
        let username = decode_id_token_claims(id_token)?
            .preferred_username
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                AccessError::AuthCode("identity token has no preferred_username claim".into())
            })?;
        Ok((username, tokens))
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingAuthorization>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
