//! Plugin assembly
//!
//! [`SigningPlugin`] wires one [`KeyStore`] to the components that read it
//! ([`Signer`], [`KeyPublisher`]) and the one that writes it
//! ([`RotationScheduler`]). It is cheap to clone and is what transports hold.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::config::PluginConfig;
use crate::keys::{KeyGenerator, KeyId, SigningKey, SoftwareKeyGenerator};
use crate::metadata::{Metadata, MetadataProvider};
use crate::publisher::{KeyPublisher, PublishedKeys};
use crate::rotation::{RotationHandle, RotationScheduler};
use crate::signer::{SignedHeader, Signer};
use crate::store::{KeySnapshot, KeyStore};

/// External JWT signing plugin
#[derive(Debug, Clone)]
pub struct SigningPlugin {
    config: Arc<PluginConfig>,
    store: Arc<KeyStore>,
    signer: Signer,
    publisher: KeyPublisher,
    metadata: MetadataProvider,
    scheduler: Arc<RotationScheduler>,
    clock: Arc<dyn Clock>,
}

impl SigningPlugin {
    /// Build a plugin with the system clock and in-process key generation
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`](crate::PluginError::InvalidConfiguration)
    /// if the rotation policy is inconsistent.
    pub fn new(config: PluginConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(SystemClock),
            Arc::new(SoftwareKeyGenerator::new()),
        )
    }

    /// Build a plugin with a custom clock and key generator
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`](crate::PluginError::InvalidConfiguration)
    /// if the rotation policy is inconsistent.
    pub fn with_parts(
        config: PluginConfig,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Result<Self> {
        config.rotation().validate()?;

        let store = Arc::new(KeyStore::new(config.refresh_hint(), Arc::clone(&clock)));
        let scheduler = Arc::new(RotationScheduler::new(
            Arc::clone(&store),
            generator,
            config.rotation().clone(),
            Arc::clone(&clock),
        ));

        Ok(Self {
            signer: Signer::new(Arc::clone(&store)),
            publisher: KeyPublisher::new(Arc::clone(&store)),
            metadata: MetadataProvider::new(config.max_token_lifetime()),
            config: Arc::new(config),
            store,
            scheduler,
            clock,
        })
    }

    /// Install the first signing key
    ///
    /// # Errors
    ///
    /// Propagates key generation failures; the caller should not start serving.
    pub async fn bootstrap(&self) -> Result<Arc<KeySnapshot>> {
        let snapshot = self.scheduler.bootstrap().await?;
        if let Some(active) = snapshot.active() {
            info!(kid = %active.id(), alg = %active.algorithm(), "Signing plugin ready");
        }
        Ok(snapshot)
    }

    /// Import a PEM public key as a verify-only key
    ///
    /// The key is published with `exclude_from_oidc_discovery = true`, is never
    /// used for signing, and is removed after the usual grace period.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::KeyUnavailable`](crate::PluginError::KeyUnavailable)
    /// for unparseable PEM and a contract violation for a duplicate key id.
    pub fn import_verification_key(&self, pem: &str, key_id: Option<KeyId>) -> Result<KeyId> {
        let key = SigningKey::verification_only_from_pem(pem, key_id, self.now())?;
        let id = key.id().clone();
        self.store.install_verification_key(key)?;
        Ok(id)
    }

    /// Sign a claims segment with the active key
    ///
    /// # Errors
    ///
    /// See [`Signer::sign`].
    pub fn sign(&self, claims: &str) -> Result<SignedHeader> {
        self.signer.sign(claims)
    }

    /// Current verification keys
    ///
    /// # Errors
    ///
    /// See [`KeyPublisher::fetch_keys`].
    pub fn fetch_keys(&self) -> Result<PublishedKeys> {
        self.publisher.fetch_keys()
    }

    /// Token lifetime policy
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        self.metadata.metadata()
    }

    /// Spawn the background rotation loop
    #[must_use]
    pub fn start_rotation(&self, cancel: CancellationToken) -> RotationHandle {
        Arc::clone(&self.scheduler).spawn(cancel)
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Underlying key store
    #[must_use]
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Underlying rotation scheduler
    #[must_use]
    pub fn scheduler(&self) -> &Arc<RotationScheduler> {
        &self.scheduler
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
