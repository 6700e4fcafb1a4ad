//! Concrete stores built on [`crate::store::AsyncStore`].

pub mod basic_auth;
pub mod cluster_data;
pub mod config;
pub mod sso_auth;

pub use basic_auth::BasicAuthStore;
pub use cluster_data::{ClusterDataStore, ClusterDataset, ClusterSummary, NamespaceClusters};
pub use config::{parse_descriptor, ConfigDescriptor, ConfigStore};
pub use sso_auth::{OAuthCallback, SsoAuthStore};
