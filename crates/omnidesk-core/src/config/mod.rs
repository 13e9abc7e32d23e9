//! Configuration loading.
//!
//! JSON5 config for the gateway process. Config location:
//! `~/.omnidesk/omnidesk.json`, overridable with `OMNIDESK_STATE_DIR`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Webchat session settings.
    #[serde(default)]
    pub sessions: SessionSettings,
}

/// Gateway server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Bind address.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for the widget and inbox UI origins.
    pub cors: bool,
    /// Data directory for the local store; defaults to the state dir.
    pub data_dir: Option<PathBuf>,
    /// Externally visible base URL, required to validate Twilio webhook
    /// signatures (they sign the full public URL).
    pub public_base_url: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 18980,
            cors: true,
            data_dir: None,
            public_base_url: None,
        }
    }
}

/// Webchat session registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Idle minutes before a visitor session is evicted.
    pub ttl_minutes: i64,
    /// Minutes between eviction sweeps.
    pub sweep_interval_minutes: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: 24 * 60,
            sweep_interval_minutes: 30,
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns error if an existing config cannot be read or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("omnidesk.json")
    }

    /// The state directory.
    ///
    /// Uses `OMNIDESK_STATE_DIR` if set, otherwise `~/.omnidesk`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("OMNIDESK_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".omnidesk")
        } else {
            PathBuf::from(".omnidesk")
        }
    }

    /// Resolved data directory for the local store.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.gateway
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("data"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.port == 0 {
            return Err(ConfigError::Validation(
                "gateway.port must be nonzero".to_string(),
            ));
        }
        if self.sessions.ttl_minutes <= 0 {
            return Err(ConfigError::Validation(
                "sessions.ttlMinutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.port, 18980);
        assert_eq!(config.sessions.ttl_minutes, 1440);
    }

    #[test]
    fn test_load_json5() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("omnidesk.json");
        std::fs::write(
            &path,
            r"{
              // comments are allowed
              gateway: { bindAddress: '0.0.0.0', port: 9000, cors: false },
            }",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway.bind_address, "0.0.0.0");
        assert_eq!(config.gateway.port, 9000);
        assert!(!config.gateway.cors);
    }

    #[test]
    fn test_rejects_zero_port() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("omnidesk.json");
        std::fs::write(&path, r"{ gateway: { bindAddress: 'x', port: 0, cors: true } }").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_save_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("omnidesk.json");
        let mut config = Config::default();
        config.gateway.port = 12345;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.gateway.port, 12345);
    }
}
