//! Login orchestration across the config, auth and cluster-data stores.
//!
//! The orchestrator owns the [`Session`] and lends it to one store per call.
//! It decides between a cheap refresh of the cluster inventory and a fresh
//! login, and wires the config store to the SSO store through an intent flag
//! so that single sign-on only starts after the user asked for access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::browser::BrowserLauncher;
use crate::config::AccessConfig;
use crate::deep_link::ExtEvent;
use crate::error::{AccessError, Result};
use crate::net::normalize_url;
use crate::oidc::OidcClient;
use crate::prefs::Preferences;
use crate::session::{Session, SessionCell};
use crate::store::{StorePhase, StoreState};
use crate::stores::{
    BasicAuthStore, ClusterDataStore, ConfigDescriptor, ConfigStore, OAuthCallback, SsoAuthStore,
};

/// Credentials submitted from the login form.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Which path [`LoginOrchestrator::handle_login`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPath {
    /// Session matched; only the cluster inventory was reloaded.
    Refresh,
    /// Stores were reset and a new login was started.
    FreshLogin,
}

/// Explicit replacement for process-wide store singletons.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use cluster_access::browser::SystemBrowser;
/// use cluster_access::config::AccessConfig;
/// use cluster_access::orchestrator::{LoginOrchestrator, LoginRequest};
/// use cluster_access::prefs::FilePreferences;
///
/// # async fn run() -> cluster_access::error::Result<()> {
/// let config = AccessConfig::from_env();
/// let prefs = Arc::new(FilePreferences::new(config.preferences_dir.clone()));
/// let orchestrator = LoginOrchestrator::new(config, prefs, Arc::new(SystemBrowser))?;
///
/// let endpoint = orchestrator
///     .handle_access_endpoint_change("mcc.example.com/")
///     .await?;
/// orchestrator
///     .handle_login(LoginRequest::new(endpoint, "writer", "secret"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct LoginOrchestrator {
    prefs: Arc<dyn Preferences>,
    session: SessionCell,
    config_store: Arc<ConfigStore>,
    basic_auth: Arc<BasicAuthStore>,
    sso_auth: Arc<SsoAuthStore>,
    cluster_data: Arc<ClusterDataStore>,
    access_requested: Arc<AtomicBool>,
    config_endpoint: Mutex<Option<String>>,
    clusters_endpoint: Mutex<Option<String>>,
}

impl LoginOrchestrator {
    pub fn new(
        config: AccessConfig,
        prefs: Arc<dyn Preferences>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self> {
        let client = config.http_client()?;
        let oidc = OidcClient::new(client.clone(), &config);

        let orchestrator = Self {
            prefs,
            session: SessionCell::default(),
            config_store: Arc::new(ConfigStore::new(client.clone())),
            basic_auth: Arc::new(BasicAuthStore::new(oidc.clone())),
            sso_auth: Arc::new(SsoAuthStore::new(oidc.clone(), launcher)),
            cluster_data: Arc::new(ClusterDataStore::new(client, oidc)),
            access_requested: Arc::new(AtomicBool::new(false)),
            config_endpoint: Mutex::new(None),
            clusters_endpoint: Mutex::new(None),
        };
        orchestrator.watch_config();
        Ok(orchestrator)
    }

    /// Start SSO when a config load requested by the user completes.
    fn watch_config(&self) {
        let sso_auth = Arc::clone(&self.sso_auth);
        let session = self.session.clone();
        let access_requested = Arc::clone(&self.access_requested);

        self.config_store
            .state()
            .subscribe(move |state: &StoreState<ConfigDescriptor>| {
                if !state.loaded {
                    return;
                }
                if !access_requested.swap(false, Ordering::SeqCst) {
                    debug!("config loaded without access request");
                    return;
                }
                let Some(descriptor) = state.data.as_ref().filter(|_| state.error.is_none())
                else {
                    return;
                };
                if !descriptor.sso_required() {
                    return;
                }
                match session.lend() {
                    Ok(mut session) => {
                        session.reset_credentials();
                        session.reset_tokens();
                        session.uses_sso = true;
                    }
                    Err(e) => warn!(error = %e, "could not clear session before SSO"),
                }
                sso_auth.start_authorization(descriptor);
            });
    }

    pub fn session(&self) -> Result<Session> {
        self.session.snapshot()
    }

    pub fn session_cell(&self) -> &SessionCell {
        &self.session
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn basic_auth(&self) -> &BasicAuthStore {
        &self.basic_auth
    }

    pub fn sso_auth(&self) -> &SsoAuthStore {
        &self.sso_auth
    }

    pub fn cluster_data(&self) -> &ClusterDataStore {
        &self.cluster_data
    }

    pub fn remembered_endpoint(&self) -> Result<Option<String>> {
        self.prefs.load_endpoint()
    }

    /// Log in to `request.endpoint`, reusing the current session when it
    /// still matches the submitted credentials.
    pub async fn handle_login(&self, request: LoginRequest) -> Result<LoginPath> {
        let endpoint = normalize_url(&request.endpoint);

        if self.matches_current_login(&endpoint, &request)? {
            info!(endpoint = %endpoint, "session unchanged, refreshing cluster data");
            self.load_cluster_data(&endpoint).await?;
            return Ok(LoginPath::Refresh);
        }

        info!(endpoint = %endpoint, "starting fresh login");
        let config = self.ensure_config(&endpoint).await?;
        {
            let mut session = self.session.lend()?;
            self.ensure_downstream_idle()?;
            self.reset_downstream()?;
            session.reset_credentials();
            session.reset_tokens();
            session.endpoint = Some(endpoint.clone());
            session.uses_sso = config.sso_required();
        }

        if config.sso_required() {
            self.sso_auth.start_authorization(&config);
            return Ok(LoginPath::FreshLogin);
        }

        {
            let mut session = self.session.lend()?;
            self.basic_auth
                .exchange(
                    &endpoint,
                    &config,
                    &request.username,
                    &request.password,
                    &mut session,
                )
                .await;
        }
        if self.basic_auth.state().snapshot().succeeded() {
            self.load_cluster_data(&endpoint).await?;
        }
        Ok(LoginPath::FreshLogin)
    }

    /// Switch to a new management endpoint. Returns the canonical URL.
    ///
    /// Everything derived from the previous endpoint is discarded. SSO starts
    /// automatically once the new config is loaded, if the endpoint needs it.
    pub async fn handle_access_endpoint_change(&self, url: &str) -> Result<String> {
        let endpoint = normalize_url(url);
        if self.config_store.state().is_loading() {
            return Err(AccessError::StoreBusy(self.config_store.state().name()));
        }
        self.ensure_downstream_idle()?;
        {
            let mut session = self.session.lend()?;
            self.prefs.save_endpoint(&endpoint)?;
            self.reset_downstream()?;
            session.reset_credentials();
            session.reset_tokens();
            session.endpoint = Some(endpoint.clone());
        }

        info!(endpoint = %endpoint, "access endpoint changed");
        self.access_requested.store(true, Ordering::SeqCst);
        self.load_config(&endpoint).await;
        Ok(endpoint)
    }

    /// Complete a pending SSO attempt and load clusters on success.
    ///
    /// Returns `false` when the callback was ignored or the exchange failed.
    pub async fn handle_oauth_callback(&self, callback: OAuthCallback) -> Result<bool> {
        if !self.sso_auth.is_awaiting_redirect() {
            debug!("no authorization pending, dropping callback");
            return Ok(false);
        }
        let endpoint = self.current_endpoint()?.ok_or_else(|| {
            AccessError::Config("no endpoint selected for authorization".to_string())
        })?;
        let config = self.ensure_config(&endpoint).await?;

        {
            let mut session = self.session.lend()?;
            self.sso_auth
                .complete_authorization(&callback, &config, &mut session)
                .await;
        }
        if !self.sso_auth.state().snapshot().succeeded() {
            return Ok(false);
        }
        self.load_cluster_data(&endpoint).await?;
        Ok(true)
    }

    /// Load the config of the remembered endpoint if nothing was loaded yet.
    ///
    /// SSO does not start from here; the user has not asked for access.
    pub async fn restore(&self) -> Result<bool> {
        let Some(endpoint) = self.prefs.load_endpoint()? else {
            return Ok(false);
        };
        if self.config_store.state().snapshot().phase() != StorePhase::Idle {
            return Ok(false);
        }
        {
            let mut session = self.session.lend()?;
            if session.endpoint.is_none() {
                session.endpoint = Some(endpoint.clone());
            }
        }
        debug!(endpoint = %endpoint, "restoring remembered endpoint");
        Ok(self.load_config(&endpoint).await)
    }

    /// Resume an SSO session that is already valid without a new redirect.
    pub async fn resume_session(&self) -> Result<bool> {
        let session = self.session.snapshot()?;
        if !(session.is_valid() && session.uses_sso && session.tokens.is_some()) {
            return Ok(false);
        }
        let Some(endpoint) = self.current_endpoint()? else {
            return Ok(false);
        };
        self.sso_auth.set_authorized()?;
        info!(endpoint = %endpoint, "resuming single sign-on session");
        self.load_cluster_data(&endpoint).await
    }

    /// Handle OAuth callbacks; other events are returned to the host.
    pub async fn handle_event(&self, event: ExtEvent) -> Result<Option<ExtEvent>> {
        match event {
            ExtEvent::OAuthCode(callback) => {
                self.handle_oauth_callback(callback).await?;
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }

    fn matches_current_login(&self, endpoint: &str, request: &LoginRequest) -> Result<bool> {
        if !self.cluster_data.state().snapshot().succeeded() {
            return Ok(false);
        }
        if lock_slot(&self.clusters_endpoint).as_deref() != Some(endpoint) {
            return Ok(false);
        }
        if self.prefs.load_endpoint()?.as_deref() != Some(endpoint) {
            return Ok(false);
        }
        // Every session field that affects validity has to be compared here.
        let session = self.session.snapshot()?;
        Ok(session.is_valid()
            && session.endpoint.as_deref() == Some(endpoint)
            && session.username.as_deref() == Some(request.username.as_str())
            && (session.uses_sso || session.password.as_deref() == Some(request.password.as_str())))
    }

    async fn ensure_config(&self, endpoint: &str) -> Result<ConfigDescriptor> {
        let loaded_for = lock_slot(&self.config_endpoint).clone();
        if loaded_for.as_deref() == Some(endpoint) {
            if let Some(descriptor) = self.config_store.descriptor() {
                return Ok(descriptor);
            }
        }
        self.load_config(endpoint).await;
        if let Some(descriptor) = self.config_store.descriptor() {
            return Ok(descriptor);
        }
        Err(self.config_store.state().snapshot().error.unwrap_or_else(|| {
            AccessError::Config(format!("configuration for {endpoint} is not loaded"))
        }))
    }

    async fn load_config(&self, endpoint: &str) -> bool {
        *lock_slot(&self.config_endpoint) = Some(endpoint.to_string());
        self.config_store.load(endpoint).await
    }

    async fn load_cluster_data(&self, endpoint: &str) -> Result<bool> {
        let config = self.ensure_config(endpoint).await?;
        let loaded = {
            let mut session = self.session.lend()?;
            self.cluster_data
                .load(endpoint, &config, &mut session)
                .await
        };
        if loaded {
            self.set_clusters_endpoint(Some(endpoint.to_string()));
        }
        Ok(loaded)
    }

    fn current_endpoint(&self) -> Result<Option<String>> {
        match self.session.snapshot()?.endpoint {
            Some(endpoint) => Ok(Some(endpoint)),
            None => self.prefs.load_endpoint(),
        }
    }

    /// Fails with [`AccessError::StoreBusy`] if any store a new login would
    /// reset is still loading. Nothing is changed either way.
    fn ensure_downstream_idle(&self) -> Result<()> {
        let states = [
            (self.basic_auth.state().is_loading(), self.basic_auth.state().name()),
            (self.sso_auth.state().is_loading(), self.sso_auth.state().name()),
            (self.cluster_data.state().is_loading(), self.cluster_data.state().name()),
        ];
        match states.into_iter().find(|(loading, _)| *loading) {
            Some((_, name)) => Err(AccessError::StoreBusy(name)),
            None => Ok(()),
        }
    }

    // callers run ensure_downstream_idle first so none of these resets fail
    fn reset_downstream(&self) -> Result<()> {
        self.basic_auth.reset()?;
        self.sso_auth.reset()?;
        self.cluster_data.reset()?;
        self.set_clusters_endpoint(None);
        Ok(())
    }

    fn set_clusters_endpoint(&self, endpoint: Option<String>) {
        *lock_slot(&self.clusters_endpoint) = endpoint;
    }
}

fn lock_slot(slot: &Mutex<Option<String>>) -> MutexGuard<'_, Option<String>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_debug_hides_password() {
        let request = LoginRequest::new("https://mcc.example.com", "writer", "hunter2");
        let rendered = format!("{request:?}");
        assert!(rendered.contains("writer"));
        assert!(!rendered.contains("hunter2"));
    }
}
