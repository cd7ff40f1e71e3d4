//! Configuration for the session core.
//!
//! The configuration carries cache and timeout tuning, the offline
//! acceptance policy, and where the session record is kept.
//!
//! Configuration is stored at `~/.config/sessionguard/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{SessionRecord, VerifyMode};
use crate::retry::RetryPolicy;
use crate::store::keychain::{DEFAULT_ACCOUNT, DEFAULT_SERVICE_NAME};
use crate::store::{EncryptedFileBackend, KeyringBackend, SecureTokenStore};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "sessionguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Fallback store file name in the data directory
const FALLBACK_FILE: &str = "session.bin";

/// Environment variable holding the fallback store secret
pub const FALLBACK_SECRET_ENV: &str = "SESSIONGUARD_FALLBACK_SECRET";

/// When verification cannot reach the network, decides whether a locally
/// unexpired record is accepted for offline use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflinePolicy {
    pub enabled: bool,
    /// Minimum lifetime the record must have left to be accepted offline.
    /// Records without an expiry always qualify.
    pub min_remaining_secs: u64,
}

impl Default for OfflinePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_remaining_secs: 0,
        }
    }
}

impl OfflinePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn permits(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        if !self.enabled || record.is_expired_at(now) {
            return false;
        }
        match record.expires_at {
            None => true,
            Some(expires_at) => {
                let min_remaining = i64::try_from(self.min_remaining_secs).unwrap_or(i64::MAX);
                (expires_at - now).num_seconds() >= min_remaining
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cache_ttl_secs: u64,
    pub fast_timeout_secs: u64,
    pub normal_timeout_secs: u64,
    pub max_jitter_ms: u64,
    pub offline_fallback: OfflinePolicy,
    pub keyring_service: String,
    pub keyring_account: String,
    pub fallback_path: Option<PathBuf>,
    pub verify_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            fast_timeout_secs: 8,
            normal_timeout_secs: 20,
            max_jitter_ms: 1000,
            offline_fallback: OfflinePolicy::default(),
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
            keyring_account: DEFAULT_ACCOUNT.to_string(),
            fallback_path: None,
            verify_url: None,
        }
    }
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn fallback_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.fallback_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(FALLBACK_FILE))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self, mode: VerifyMode) -> Duration {
        match mode {
            VerifyMode::Fast => Duration::from_secs(self.fast_timeout_secs),
            VerifyMode::Normal => Duration::from_secs(self.normal_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.max_jitter_ms))
    }

    /// Keychain-backed store with the encrypted file as fallback.
    pub fn open_store(&self) -> Result<SecureTokenStore> {
        let primary = KeyringBackend::new(&self.keyring_service, &self.keyring_account);
        let fallback = EncryptedFileBackend::new(self.fallback_path()?, fallback_secret());
        Ok(SecureTokenStore::with_fallback(primary, fallback))
    }
}

/// Secret for the fallback file: the environment override if present,
/// otherwise a value tied to this user's home directory.
pub fn fallback_secret() -> String {
    std::env::var(FALLBACK_SECRET_ENV).unwrap_or_else(|_| {
        let home = dirs::home_dir().map(|p| p.display().to_string()).unwrap_or_default();
        format!("{}:{}", APP_NAME, home)
    })
}
