//! Engine configuration.
//!
//! Loaded from `<config_dir>/mailsync/config.json`. Every field has a
//! default, so a missing or partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Directory name used under the platform config and data directories.
const APP_DIR: &str = "mailsync";

/// Runtime configuration for the sync engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the mail API.
    pub api_base_url: String,
    /// Base URL of the hosting manager API (signatures).
    pub manager_base_url: String,
    /// Identity provider token endpoint.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// Number of threads per page.
    pub page_size: u32,
    /// Distance from the end of the loaded list that triggers the next page.
    pub prefetch_distance: usize,
    /// Draft autosave debounce window, in milliseconds.
    pub autosave_delay_ms: u64,
    /// Retries for transient transport failures, per URL.
    pub max_retries: u32,
    /// Delay between transient retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Whether a failed send marks the draft dirty again.
    pub restore_dirty_on_send_failure: bool,
    /// Root directory of the per-user stores. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://mail.infomaniak.com/api".to_string(),
            manager_base_url: "https://api.infomaniak.com".to_string(),
            token_url: "https://login.infomaniak.com/token".to_string(),
            client_id: String::new(),
            page_size: 50,
            prefetch_distance: 5,
            autosave_delay_ms: 3000,
            max_retries: 3,
            retry_delay_ms: 500,
            restore_dirty_on_send_failure: false,
            data_dir: None,
        }
    }
}

impl SyncConfig {
    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Loads the config from `path`, falling back to defaults if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = serde_json::from_str(&contents)?;
                info!("Loaded config from {:?}", path);
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the config from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Self> {
        Self::default_path().map_or_else(|| Ok(Self::default()), |path| Self::load(&path))
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero page size.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Resolved root directory for per-user stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no data directory is configured and the
    /// platform has none.
    pub fn data_dir(&self) -> Result<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR)))
            .ok_or_else(|| Error::Config("no data directory available".into()))
    }

    /// Draft autosave debounce window.
    #[must_use]
    pub const fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    /// Delay between transient retries.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
