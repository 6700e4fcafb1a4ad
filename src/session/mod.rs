//! Session credentials and the single-writer lending contract.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AccessError, Result};

/// Seconds before expiry at which an access token is treated as expired.
const EXPIRY_SKEW_SECS: i64 = 30;

/// OAuth token set issued by the identity provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Whether the access token is expired (or about to be) at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|exp| exp - Duration::seconds(EXPIRY_SKEW_SECS) <= now)
            .unwrap_or(false)
    }

    /// Whether the refresh token can still be used at `now`.
    pub fn can_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some()
            && self.refresh_expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"..")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("id_token", &self.id_token.as_ref().map(|_| ".."))
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Credentials and tokens for one management endpoint.
///
/// A session is *valid* when a username is set and either a password or a
/// token set is present.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tokens: Option<TokenSet>,
    pub uses_sso: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.username.is_some() && (self.password.is_some() || self.tokens.is_some())
    }

    /// Clears username and password.
    pub fn reset_credentials(&mut self) {
        self.username = None;
        self.password = None;
    }

    pub fn reset_tokens(&mut self) {
        self.tokens = None;
    }

    pub fn update_tokens(&mut self, tokens: TokenSet) {
        self.tokens = Some(tokens);
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| ".."))
            .field("tokens", &self.tokens)
            .field("uses_sso", &self.uses_sso)
            .finish()
    }
}

/// Owner of the session. Lends it to one operation at a time.
///
/// Lending is checked rather than queued: asking for a lease while another
/// one is outstanding fails with [`AccessError::SessionBusy`].
///
/// # Example
/// ```
/// use cluster_access::session::{Session, SessionCell};
///
/// let cell = SessionCell::new(Session::new());
/// let mut lease = cell.lend()?;
/// lease.username = Some("admin".to_string());
/// assert!(cell.lend().is_err());
/// drop(lease);
/// assert_eq!(cell.snapshot()?.username.as_deref(), Some("admin"));
/// # Ok::<(), cluster_access::error::AccessError>(())
/// ```
#[derive(Clone, Default)]
pub struct SessionCell {
    inner: Arc<Mutex<Session>>,
}

impl SessionCell {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Borrow the session exclusively until the lease is dropped.
    pub fn lend(&self) -> Result<SessionLease> {
        self.inner
            .clone()
            .try_lock_owned()
            .map(|guard| SessionLease { guard })
            .map_err(|_| AccessError::SessionBusy)
    }

    /// Copy of the current session; fails while it is lent.
    pub fn snapshot(&self) -> Result<Session> {
        self.inner
            .try_lock()
            .map(|guard| guard.clone())
            .map_err(|_| AccessError::SessionBusy)
    }
}

impl fmt::Debug for SessionCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(session) => f.debug_tuple("SessionCell").field(&*session).finish(),
            Err(_) => f.write_str("SessionCell(<lent>)"),
        }
    }
}

/// Exclusive borrow of the session handed out by [`SessionCell::lend`].
pub struct SessionLease {
    guard: OwnedMutexGuard<Session>,
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}
