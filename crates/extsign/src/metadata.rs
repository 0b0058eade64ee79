//! Token lifetime policy negotiated with the caller at startup

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::{MIN_TOKEN_EXPIRATION_SECONDS, Result};

/// Maximum lifetime of any token the caller will mint; at least 600 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct MaxTokenLifetime(i64);

impl MaxTokenLifetime {
    /// Default lifetime (1 hour)
    pub const DEFAULT: Self = Self(3600);

    /// Validate a maximum token lifetime
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`] below 600 seconds.
    pub fn from_secs(secs: i64) -> Result<Self> {
        if secs < MIN_TOKEN_EXPIRATION_SECONDS {
            return Err(PluginError::config(format!(
                "max_token_expiration_seconds must be at least {MIN_TOKEN_EXPIRATION_SECONDS}, got {secs}"
            )));
        }
        Ok(Self(secs))
    }

    /// Lifetime in seconds, as sent on the wire
    #[must_use]
    pub fn as_secs(self) -> i64 {
        self.0
    }

    /// Lifetime as a duration
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0.unsigned_abs())
    }
}

impl Default for MaxTokenLifetime {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for MaxTokenLifetime {
    type Error = PluginError;

    fn try_from(secs: i64) -> Result<Self> {
        Self::from_secs(secs)
    }
}

impl From<MaxTokenLifetime> for i64 {
    fn from(lifetime: MaxTokenLifetime) -> Self {
        lifetime.0
    }
}

/// Metadata response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Longest lifetime the caller may give a token signed by this plugin
    pub max_token_expiration_seconds: i64,
}

/// Returns the same [`Metadata`] for the lifetime of the process
#[derive(Debug, Clone, Copy)]
pub struct MetadataProvider {
    metadata: Metadata,
}

impl MetadataProvider {
    /// Fix the metadata for this process
    #[must_use]
    pub fn new(max_token_lifetime: MaxTokenLifetime) -> Self {
        Self {
            metadata: Metadata {
                max_token_expiration_seconds: max_token_lifetime.as_secs(),
            },
        }
    }

    /// The negotiated metadata
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_lifetime_enforced() {
        assert!(MaxTokenLifetime::from_secs(599).is_err());
        assert!(MaxTokenLifetime::from_secs(0).is_err());
        assert!(MaxTokenLifetime::from_secs(-1).is_err());
        assert_eq!(MaxTokenLifetime::from_secs(600).unwrap().as_secs(), 600);
    }

    #[test]
    fn test_metadata_is_stable() {
        let provider = MetadataProvider::new(MaxTokenLifetime::from_secs(3600).unwrap());
        let first = provider.metadata();
        for _ in 0..10 {
            assert_eq!(provider.metadata(), first);
        }
        assert_eq!(first.max_token_expiration_seconds, 3600);
    }

    #[test]
    fn test_deserialize_rejects_short_lifetime() {
        let err = serde_json::from_str::<MaxTokenLifetime>("120").unwrap_err();
        assert!(err.to_string().contains("at least 600"));
    }
}
