//! Connection configuration and TOML profile handling
//!
//! A profile file looks like:
//!
//! ```toml
//! [connection]
//! host = "broker.example.net"
//! port = 1883
//! client_id = "bench-rig"
//! username = "operator"
//! password = "secret"
//! keep_alive_secs = 60
//!
//! topics = ["sensors/#", "machines/+/status"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything needed for one connection attempt
///
/// Immutable once a connect starts; reconfiguring means replacing the whole
/// value and connecting again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Left blank, a fresh id is generated per connection attempt
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "broker port must be between 1 and 65535".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured id, or a generated one when the field is blank
    pub fn effective_client_id(&self) -> String {
        let trimmed = self.client_id.trim();
        if trimmed.is_empty() {
            format!("mqttdeck-{}", Uuid::new_v4().simple())
        } else {
            trimmed.to_string()
        }
    }

    /// Keep-alive as a duration; the transport requires at least 5 seconds
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(5))
    }
}

/// A stored profile: the connection plus the topics to subscribe after it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Subscribed on connect by the monitor binary; the library never
    /// resubscribes implicitly
    #[serde(default)]
    pub topics: Vec<String>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&raw)?;
        config.connection.validate()?;
        debug!(path = %path.as_ref().display(), "loaded config profile");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), raw)?;
        Ok(())
    }

    /// Per-user default profile location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mqttdeck").join("profile.toml"))
    }
}
