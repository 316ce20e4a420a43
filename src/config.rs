// Configuration for plexfm
//
// The configuration file is read once at process start. The only runtime
// mutation is the session-key write-back after a user completes the Last.fm
// authorization flow; that write is persisted back to the same file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Error type for configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown user: {0}")]
    UnknownUser(String),
}

/// Shared application-level Last.fm API credentials, used by every user
/// entry that does not carry its own key pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Per-user settings, keyed by the media server account name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    /// Cached Last.fm session key, written back after the one-time
    /// authorization handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default = "default_scrobble")]
    pub scrobble: bool,
}

fn default_scrobble() -> bool {
    true
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            api_key: None,
            api_secret: None,
            session_key: None,
            scrobble: default_scrobble(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastfm: Option<SharedCredentials>,
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,
}

fn default_listen_port() -> u16 {
    1080
}

impl ServiceConfig {
    /// Effective API credentials for a user: a per-user key pair takes
    /// precedence over the shared application credentials.
    pub fn credentials_for(&self, account: &str) -> Option<(String, String)> {
        let user = self.users.get(account)?;
        match (&user.api_key, &user.api_secret) {
            (Some(key), Some(secret)) => Some((key.clone(), secret.clone())),
            _ => self
                .lastfm
                .as_ref()
                .map(|c| (c.api_key.clone(), c.api_secret.clone())),
        }
    }
}

/// Process-wide configuration store.
///
/// Reads are concurrent; the session-key write-back is serialized through a
/// dedicated writer guard so concurrent first-use handshakes cannot corrupt
/// the persisted file.
pub struct ConfigStore {
    data: RwLock<ServiceConfig>,
    file_path: PathBuf,
    write_guard: Mutex<()>,
}

impl ConfigStore {
    /// Load the configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: ServiceConfig = serde_json::from_str(&content)?;
        info!(
            "Loaded configuration with {} user(s) from {}",
            config.users.len(),
            path.as_ref().display()
        );
        Ok(ConfigStore::new(config, path.as_ref().to_path_buf()))
    }

    pub fn new(config: ServiceConfig, file_path: PathBuf) -> Self {
        ConfigStore {
            data: RwLock::new(config),
            file_path,
            write_guard: Mutex::new(()),
        }
    }

    /// Clone of the current configuration
    pub fn snapshot(&self) -> ServiceConfig {
        self.data.read().clone()
    }

    pub fn listen_port(&self) -> u16 {
        self.data.read().listen_port
    }

    pub fn session_key(&self, account: &str) -> Option<String> {
        self.data
            .read()
            .users
            .get(account)
            .and_then(|u| u.session_key.clone())
    }

    /// Store a newly obtained session key for a user and persist the
    /// configuration file, so later restarts skip the authorization
    /// handshake.
    pub fn set_session_key(&self, account: &str, session_key: &str) -> Result<(), ConfigError> {
        let _write = self.write_guard.lock();
        {
            let mut data = self.data.write();
            let user = data
                .users
                .get_mut(account)
                .ok_or_else(|| ConfigError::UnknownUser(account.to_string()))?;
            user.session_key = Some(session_key.to_string());
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&*self.data.read())?;
        fs::write(&self.file_path, json)?;
        debug!("Persisted configuration to {}", self.file_path.display());
        Ok(())
    }
}
