//! Validated plugin configuration
//!
//! [`PluginConfig`] only holds values that already passed validation, so every
//! component downstream of it can trust its inputs. Build one with
//! [`PluginConfig::builder`].

use std::time::Duration;

use crate::Result;
use crate::keys::SigningAlgorithm;
use crate::metadata::MaxTokenLifetime;
use crate::rotation::RotationPolicy;
use crate::store::RefreshHint;

/// Plugin configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    refresh_hint: RefreshHint,
    max_token_lifetime: MaxTokenLifetime,
    rotation: RotationPolicy,
}

impl PluginConfig {
    /// Start building a configuration from defaults
    #[must_use]
    pub fn builder() -> PluginConfigBuilder {
        PluginConfigBuilder::default()
    }

    /// Advised FetchKeys re-poll interval
    #[must_use]
    pub fn refresh_hint(&self) -> RefreshHint {
        self.refresh_hint
    }

    /// Maximum token lifetime reported by Metadata
    #[must_use]
    pub fn max_token_lifetime(&self) -> MaxTokenLifetime {
        self.max_token_lifetime
    }

    /// Algorithm of newly generated keys
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.rotation.algorithm
    }

    /// Key rotation policy
    #[must_use]
    pub fn rotation(&self) -> &RotationPolicy {
        &self.rotation
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            refresh_hint: RefreshHint::DEFAULT,
            max_token_lifetime: MaxTokenLifetime::DEFAULT,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Builder for [`PluginConfig`]
///
/// Raw values are accepted as-is and checked in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PluginConfigBuilder {
    refresh_hint_seconds: i64,
    max_token_expiration_seconds: i64,
    rotation: RotationPolicy,
}

impl Default for PluginConfigBuilder {
    fn default() -> Self {
        Self {
            refresh_hint_seconds: RefreshHint::DEFAULT.as_secs(),
            max_token_expiration_seconds: MaxTokenLifetime::DEFAULT.as_secs(),
            rotation: RotationPolicy::default(),
        }
    }
}

impl PluginConfigBuilder {
    /// Set the FetchKeys refresh hint
    #[must_use]
    pub fn refresh_hint_seconds(mut self, secs: i64) -> Self {
        self.refresh_hint_seconds = secs;
        self
    }

    /// Set the maximum token lifetime reported by Metadata
    #[must_use]
    pub fn max_token_expiration_seconds(mut self, secs: i64) -> Self {
        self.max_token_expiration_seconds = secs;
        self
    }

    /// Set the algorithm of newly generated keys
    #[must_use]
    pub fn algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.rotation.algorithm = algorithm;
        self
    }

    /// Set how long a key stays active before it is rotated out
    #[must_use]
    pub fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation.rotation_interval = interval;
        self
    }

    /// Set how often the scheduler checks for due rotations and expired keys
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.rotation.check_interval = interval;
        self
    }

    /// Set the slack added to the max token lifetime before a retired key is removed
    #[must_use]
    pub fn safety_margin(mut self, margin: Duration) -> Self {
        self.rotation.safety_margin = margin;
        self
    }

    /// Set the retry backoff bounds for failed rotations
    #[must_use]
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.rotation.initial_backoff = initial;
        self.rotation.max_backoff = max;
        self
    }

    /// Replace the whole rotation policy
    #[must_use]
    pub fn rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation = policy;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`](crate::PluginError::InvalidConfiguration)
    /// if the refresh hint is not positive, the max token lifetime is below 600
    /// seconds, or the rotation policy is inconsistent.
    pub fn build(self) -> Result<PluginConfig> {
        let refresh_hint = RefreshHint::from_secs(self.refresh_hint_seconds)?;
        let max_token_lifetime = MaxTokenLifetime::from_secs(self.max_token_expiration_seconds)?;
        let mut rotation = self.rotation;
        rotation.max_token_lifetime = max_token_lifetime;
        rotation.validate()?;

        Ok(PluginConfig {
            refresh_hint,
            max_token_lifetime,
            rotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, PluginError};

    #[test]
    fn test_defaults() {
        let config = PluginConfig::builder().build().unwrap();
        assert_eq!(config, PluginConfig::default());
        assert_eq!(config.refresh_hint().as_secs(), 300);
        assert_eq!(config.max_token_lifetime().as_secs(), 3600);
        assert_eq!(config.algorithm(), SigningAlgorithm::RS256);
        assert_eq!(config.rotation().rotation_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn test_zero_refresh_hint_rejected() {
        let err = PluginConfig::builder()
            .refresh_hint_seconds(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidConfiguration(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_short_lifetime_rejected() {
        assert!(
            PluginConfig::builder()
                .max_token_expiration_seconds(599)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_lifetime_flows_into_rotation_policy() {
        let config = PluginConfig::builder()
            .max_token_expiration_seconds(600)
            .safety_margin(Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!(
            config.rotation().grace_period(),
            Duration::from_secs(630)
        );
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let err = PluginConfig::builder()
            .backoff(Duration::from_secs(10), Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("backoff"));
    }
}
