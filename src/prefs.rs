//! Remembered-endpoint persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AccessError, Result};

const PREFERENCES_FILE: &str = "preferences.toml";
const PREFERENCES_VERSION: u32 = 1;

/// Storage abstraction for user preferences owned by the host.
pub trait Preferences: Send + Sync {
    fn load_endpoint(&self) -> Result<Option<String>>;
    fn save_endpoint(&self, endpoint: &str) -> Result<()>;
}

/// File-backed preferences using a versioned TOML file.
///
/// # Example
/// ```no_run
/// use cluster_access::prefs::{FilePreferences, Preferences};
///
/// let prefs = FilePreferences::new(std::path::PathBuf::from("/tmp/cluster-access"));
/// prefs.save_endpoint("https://mcc.example.com")?;
/// assert_eq!(prefs.load_endpoint()?.as_deref(), Some("https://mcc.example.com"));
/// # Ok::<(), cluster_access::error::AccessError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FilePreferences {
    base_dir: PathBuf,
}

impl FilePreferences {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path(&self) -> PathBuf {
        self.base_dir.join(PREFERENCES_FILE)
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Preferences for FilePreferences {
    fn load_endpoint(&self) -> Result<Option<String>> {
        let raw = match fs::read_to_string(self.path()) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AccessError::Preferences(err.to_string())),
        };
        let file: PreferencesFile = toml::from_str(&raw)?;
        if file.version != PREFERENCES_VERSION {
            return Err(AccessError::Preferences(format!(
                "unsupported preferences version {}",
                file.version
            )));
        }
        Ok(file.cloud_url)
    }

    fn save_endpoint(&self, endpoint: &str) -> Result<()> {
        let path = self.path();
        Self::ensure_parent(&path)?;
        let file = PreferencesFile {
            version: PREFERENCES_VERSION,
            cloud_url: Some(endpoint.to_string()),
            saved_at: Utc::now(),
        };
        fs::write(&path, toml::to_string(&file)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

/// In-process preferences for hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    endpoint: Mutex<Option<String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Mutex::new(Some(endpoint.into())),
        }
    }
}

impl Preferences for MemoryPreferences {
    fn load_endpoint(&self) -> Result<Option<String>> {
        Ok(self
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_endpoint(&self, endpoint: &str) -> Result<()> {
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(endpoint.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferencesFile {
    version: u32,
    cloud_url: Option<String>,
    saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn endpoint_survives_reload() {
        let dir = TempDir::new().unwrap();
        let prefs = FilePreferences::new(dir.path().join("nested"));
        assert_eq!(prefs.load_endpoint().unwrap(), None);

        prefs.save_endpoint("https://mcc.example.com").unwrap();
        let reopened = FilePreferences::new(dir.path().join("nested"));
        assert_eq!(
            reopened.load_endpoint().unwrap().as_deref(),
            Some("https://mcc.example.com")
        );
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(PREFERENCES_FILE),
            "version = 9\ncloud_url = \"https://x\"\nsaved_at = \"2026-01-01T00:00:00Z\"\n",
        )
        .unwrap();
        let prefs = FilePreferences::new(dir.path().to_path_buf());
        assert!(matches!(
            prefs.load_endpoint(),
            Err(AccessError::Preferences(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn preferences_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let prefs = FilePreferences::new(dir.path().to_path_buf());
        prefs.save_endpoint("https://mcc.example.com").unwrap();
        let mode = fs::metadata(dir.path().join(PREFERENCES_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn memory_preferences_round_trip() {
        let prefs = MemoryPreferences::new();
        prefs.save_endpoint("https://a.example.com").unwrap();
        assert_eq!(
            prefs.load_endpoint().unwrap().as_deref(),
            Some("https://a.example.com")
        );
    }
}
