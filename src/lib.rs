//! cluster-access: console login and session orchestration
//!
//! Logs a desktop console into a remote cluster-management endpoint, either
//! with a username/password exchange or with single sign-on through an
//! external browser, and keeps the cluster inventory for that endpoint.
//! Inbound protocol callbacks (OAuth redirects, cluster hand-offs) are decoded
//! by the [`deep_link`] dispatcher.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cluster_access::prelude::*;
//!
//! # async fn example() -> cluster_access::error::Result<()> {
//! let config = AccessConfig::from_env();
//! let prefs = Arc::new(FilePreferences::new(config.preferences_dir.clone()));
//! let orchestrator = LoginOrchestrator::new(config, prefs, Arc::new(SystemBrowser))?;
//!
//! let (dispatcher, mut events) = DeepLinkDispatcher::channel();
//! orchestrator.handle_access_endpoint_change("https://mcc.example.com").await?;
//!
//! dispatcher.dispatch_uri("lens://app/oauth/code?code=abc&state=xyz");
//! while let Some(event) = events.recv().await {
//!     if let Some(other) = orchestrator.handle_event(event).await? {
//!         println!("host event: {other:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod deep_link;
pub mod error;
pub mod net;
pub mod oidc;
pub mod orchestrator;
pub mod prefs;
pub mod prelude;
pub mod session;
pub mod store;
pub mod stores;
