use crate::entry::BaseUrls;
use crate::error::{Result, UpdaterError};
use crate::fetcher::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Location of the update configuration relative to a tier root.
pub const UPDATE_CONFIG_FILE: &str = "media/update.json";

/// Tunables of an update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Platform tag used in the eligibility table and content URLs.
    pub platform: String,
    /// Base URL of the bundled, read-only data directory.
    pub data_url: String,
    /// Base URL of the writable data directory.
    pub persistent_url: String,
    /// Filesystem root of the writable data directory.
    pub persistent_path: PathBuf,
    /// Distribution channel reported to the eligibility service.
    pub channel_id: Option<String>,
    /// Retry policy for every remote fetch.
    pub retry: RetryPolicy,
    /// Bytes downloaded between two manifest checkpoints.
    pub checkpoint_bytes: u64,
    /// Plans at or below this size download without confirmation.
    pub confirm_threshold_bytes: u64,
    /// Reject payloads whose CRC32 differs from the manifest.
    pub verify_checksums: bool,
    /// Skip the update and only load the local manifest.
    pub skip_update: bool,
    /// File under `persistent_path` that forces the beta channel.
    pub beta_marker: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            platform: String::new(),
            data_url: String::new(),
            persistent_url: String::new(),
            persistent_path: PathBuf::new(),
            channel_id: None,
            retry: RetryPolicy::default(),
            checkpoint_bytes: 256 * 1024,
            confirm_threshold_bytes: 5 * 1024 * 1024,
            verify_checksums: true,
            skip_update: false,
            beta_marker: "portal.txt".to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Load a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot drive an update.
    pub fn validate(&self) -> Result<()> {
        if self.platform.trim().is_empty() {
            return Err(UpdaterError::validation("platform must not be empty"));
        }
        if self.retry.attempts == 0 {
            return Err(UpdaterError::validation("retry.attempts must be at least 1"));
        }
        if self.checkpoint_bytes == 0 {
            return Err(UpdaterError::validation("checkpoint_bytes must be positive"));
        }
        Ok(())
    }

    /// Tier base URLs, each ending with `/`.
    pub fn base_urls(&self) -> BaseUrls {
        BaseUrls {
            streaming: with_trailing_slash(&self.data_url),
            persistent: with_trailing_slash(&self.persistent_url),
        }
    }

    /// Path of the beta marker file.
    pub fn beta_marker_path(&self) -> PathBuf {
        self.persistent_path.join(&self.beta_marker)
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.is_empty() || url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
