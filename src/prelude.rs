//! Convenience re-exports for common use.

pub use crate::browser::{BrowserLauncher, SystemBrowser};
pub use crate::config::AccessConfig;
pub use crate::deep_link::{DeepLinkDispatcher, DeepLinkRoute, ExtEvent};
pub use crate::error::{AccessError, Result};
pub use crate::orchestrator::{LoginOrchestrator, LoginPath, LoginRequest};
pub use crate::prefs::{FilePreferences, MemoryPreferences, Preferences};
pub use crate::session::{Session, SessionCell, TokenSet};
pub use crate::store::{AsyncStore, StorePhase, StoreState};
pub use crate::stores::{ClusterDataset, ClusterSummary, ConfigDescriptor, OAuthCallback};
