//! Error types for cluster access.

use thiserror::Error;

/// Generic message surfaced for any single sign-on failure. The upstream
/// detail is logged, never stored.
pub const SSO_FAILURE_MESSAGE: &str = "Failed to complete single sign-on authorization";

/// Primary error type for all store, session and dispatcher operations.
///
/// Payloads are plain strings so the error is `Clone` and can be kept in a
/// store snapshot handed to every observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid credentials: {0}")]
    Credential(String),

    #[error("Authorization code error: {0}")]
    AuthCode(String),

    #[error("Endpoint only supports basic authentication")]
    BasicOnly,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Store {0} is busy loading")]
    StoreBusy(&'static str),

    #[error("Session is already lent to another operation")]
    SessionBusy,

    #[error("Preferences error: {0}")]
    Preferences(String),

    #[error("Failed to open external browser: {0}")]
    Launch(String),
}

/// Coarse classification used for retry and messaging decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Authentication,
    Decode,
    State,
    Host,
}

impl AccessError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) | Self::InvalidResponse(_) => ErrorCategory::Network,
            Self::Config(_) | Self::BasicOnly => ErrorCategory::Configuration,
            Self::Credential(_) | Self::AuthCode(_) => ErrorCategory::Authentication,
            Self::Decode(_) => ErrorCategory::Decode,
            Self::StoreBusy(_) | Self::SessionBusy => ErrorCategory::State,
            Self::Preferences(_) | Self::Launch(_) => ErrorCategory::Host,
        }
    }

    /// Whether retrying the same operation may succeed. Stores never retry on
    /// their own; this is advice for the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::StoreBusy(_) | Self::SessionBusy)
    }

    /// Message safe to show to a user: no provider or transport internals.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) | Self::InvalidResponse(_) => {
                "Unable to reach the management endpoint".to_string()
            }
            Self::Config(_) => "The endpoint configuration could not be loaded".to_string(),
            Self::Credential(_) => "Invalid username or password".to_string(),
            Self::AuthCode(_) | Self::Launch(_) => SSO_FAILURE_MESSAGE.to_string(),
            Self::BasicOnly => {
                "This endpoint does not support single sign-on; use a username and password"
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for AccessError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AccessError {
    fn from(error: std::io::Error) -> Self {
        Self::Preferences(error.to_string())
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<toml::de::Error> for AccessError {
    fn from(error: toml::de::Error) -> Self {
        Self::Preferences(error.to_string())
    }
}

impl From<toml::ser::Error> for AccessError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Preferences(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AccessError>;
