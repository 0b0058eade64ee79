//! Server configuration
//!
//! Layered the 12-factor way: built-in defaults, then an optional TOML, YAML or
//! JSON file, then `EXTSIGN_` environment variables (`__` separates nesting, e.g.
//! `EXTSIGN_PLUGIN__REFRESH_HINT_SECONDS=60`), then command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use extsign::{PluginConfig, PluginError, SigningAlgorithm};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "EXTSIGN";

/// Default socket location
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/extsign/signer.sock";

/// Environment source for `prefix`
///
/// `PREFIX_PLUGIN__REFRESH_HINT_SECONDS` sets `plugin.refresh_hint_seconds`: one
/// `_` ends the prefix, `__` separates nested keys.
#[must_use]
pub fn env_source(prefix: &str) -> config::Environment {
    config::Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Values parsed but are not acceptable
    #[error(transparent)]
    Invalid(#[from] PluginError),
}

impl From<ConfigError> for PluginError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(inner) => inner,
            other => PluginError::config(other.to_string()),
        }
    }
}

/// Token and key publication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    /// Longest token lifetime the caller may request
    pub max_token_expiration_seconds: i64,
    /// Advised FetchKeys re-poll interval
    pub refresh_hint_seconds: i64,
    /// Algorithm of generated keys
    pub algorithm: SigningAlgorithm,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            max_token_expiration_seconds: 3600,
            refresh_hint_seconds: 300,
            algorithm: SigningAlgorithm::RS256,
        }
    }
}

/// Key rotation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSection {
    /// Active key age that triggers a rotation
    pub rotation_interval_seconds: u64,
    /// Background check period
    pub check_interval_seconds: u64,
    /// Slack added to the token lifetime before a retired key is removed
    pub safety_margin_seconds: u64,
    /// First retry delay after a failed rotation
    pub initial_backoff_millis: u64,
    /// Retry delay ceiling
    pub max_backoff_millis: u64,
}

impl Default for RotationSection {
    fn default() -> Self {
        Self {
            rotation_interval_seconds: 86_400,
            check_interval_seconds: 60,
            safety_margin_seconds: 300,
            initial_backoff_millis: 500,
            max_backoff_millis: 60_000,
        }
    }
}

/// A PEM public key imported as verify-only at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKeyConfig {
    /// PEM file
    pub path: PathBuf,
    /// Key id to publish; derived from the key when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket the gRPC service listens on
    pub socket_path: PathBuf,
    /// Token and key publication settings
    pub plugin: PluginSection,
    /// Key rotation settings
    pub rotation: RotationSection,
    /// Verify-only keys imported at startup
    pub verification_keys: Vec<VerificationKeyConfig>,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            plugin: PluginSection::default(),
            rotation: RotationSection::default(),
            verification_keys: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load defaults, an optional file, and `EXTSIGN_` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an unknown extension, or
    /// any source fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Same as [`load`](Self::load) with a custom environment prefix
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(path, env_source(env_prefix))
    }

    /// Same as [`load`](Self::load) with an explicit environment source
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with_env(
        path: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("yaml" | "yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(ConfigError::UnsupportedFormat),
            };
            builder = builder.add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ));
        }

        let config = builder.add_source(environment).build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate and convert into the plugin configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the refresh hint is not positive, the
    /// token lifetime is under 600 seconds, or the rotation settings are
    /// inconsistent.
    pub fn validate(&self) -> Result<PluginConfig, ConfigError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(PluginError::config("socket_path must not be empty").into());
        }
        let rotation = &self.rotation;
        let config = PluginConfig::builder()
            .max_token_expiration_seconds(self.plugin.max_token_expiration_seconds)
            .refresh_hint_seconds(self.plugin.refresh_hint_seconds)
            .algorithm(self.plugin.algorithm)
            .rotation_interval(Duration::from_secs(rotation.rotation_interval_seconds))
            .check_interval(Duration::from_secs(rotation.check_interval_seconds))
            .safety_margin(Duration::from_secs(rotation.safety_margin_seconds))
            .backoff(
                Duration::from_millis(rotation.initial_backoff_millis),
                Duration::from_millis(rotation.max_backoff_millis),
            )
            .build()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ServerConfig::default();
        let plugin = config.validate().unwrap();
        assert_eq!(plugin.refresh_hint().as_secs(), 300);
        assert_eq!(plugin.max_token_lifetime().as_secs(), 3600);
        assert_eq!(plugin.algorithm(), SigningAlgorithm::RS256);
        assert_eq!(config.socket_path, Path::new(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_zero_refresh_hint_is_invalid() {
        let mut config = ServerConfig::default();
        config.plugin.refresh_hint_seconds = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid(PluginError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_check_interval_is_invalid() {
        let mut config = ServerConfig::default();
        config.rotation.check_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::load(Some(Path::new("/nonexistent/extsign.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_config_error_into_plugin_error() {
        let err: PluginError = ConfigError::UnsupportedFormat.into();
        assert!(matches!(err, PluginError::InvalidConfiguration(_)));
    }
}
