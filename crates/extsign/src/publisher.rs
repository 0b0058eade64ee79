//! Key discovery view of the current snapshot

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::PluginError;
use crate::keys::KeyId;
use crate::store::{KeySnapshot, KeyStatus, KeyStore};
use crate::{MAX_KEY_ID_LENGTH, Result};

/// One published verification key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    /// Key identifier
    pub key_id: String,
    /// PKIX `SubjectPublicKeyInfo` DER
    pub key: Vec<u8>,
    /// Whether the key is verify-only
    pub exclude_from_oidc_discovery: bool,
}

/// FetchKeys response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKeys {
    /// Published keys, oldest first
    pub keys: Vec<PublicKeyRecord>,
    /// When the underlying snapshot was produced
    pub data_timestamp: DateTime<Utc>,
    /// Advised re-poll interval, always positive
    pub refresh_hint_seconds: i64,
}

impl PublishedKeys {
    /// Look up a published key by id
    #[must_use]
    pub fn find(&self, key_id: &str) -> Option<&PublicKeyRecord> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }
}

/// Answers key discovery requests
#[derive(Debug, Clone)]
pub struct KeyPublisher {
    store: Arc<KeyStore>,
}

impl KeyPublisher {
    /// Create a publisher reading from `store`
    #[must_use]
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// Publish the current snapshot
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ContractViolation`] if the snapshot would publish a
    /// non-positive refresh hint or a duplicate or oversized key id. Neither can
    /// happen with snapshots built by [`KeyStore`].
    pub fn fetch_keys(&self) -> Result<PublishedKeys> {
        let snapshot = self.store.current_snapshot();
        let published = publish_snapshot(&snapshot)?;
        debug!(
            keys = published.keys.len(),
            generation = snapshot.generation(),
            "Published verification keys"
        );
        Ok(published)
    }

    /// Lifecycle status of a key id, including removed keys
    #[must_use]
    pub fn key_status(&self, key_id: &KeyId) -> Option<KeyStatus> {
        self.store.key_status(key_id)
    }
}

fn publish_snapshot(snapshot: &KeySnapshot) -> Result<PublishedKeys> {
    let refresh_hint_seconds = snapshot.refresh_hint().as_secs();
    if refresh_hint_seconds <= 0 {
        error!(refresh_hint_seconds, "Refusing to publish non-positive refresh hint");
        return Err(PluginError::contract(format!(
            "refresh hint {refresh_hint_seconds} is not positive"
        )));
    }

    let entries = snapshot.entries();
    let mut seen = HashSet::with_capacity(entries.len());
    let mut keys = Vec::with_capacity(entries.len());
    for (key, _) in entries {
        let key_id = key.id().as_str();
        if key_id.is_empty() || key_id.chars().count() > MAX_KEY_ID_LENGTH || !seen.insert(key_id.to_string()) {
            error!(kid = %key_id, "Refusing to publish invalid or duplicate key id");
            return Err(PluginError::contract(format!(
                "key id {key_id} is invalid or duplicated"
            )));
        }
        keys.push(PublicKeyRecord {
            key_id: key_id.to_string(),
            key: key.public_key_der().to_vec(),
            exclude_from_oidc_discovery: key.exclude_from_discovery(),
        });
    }

    Ok(PublishedKeys {
        keys,
        data_timestamp: snapshot.data_timestamp(),
        refresh_hint_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::keys::{SigningAlgorithm, SigningKey};
    use crate::store::RefreshHint;

    #[test]
    fn test_fetch_keys_reflects_snapshot() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(KeyStore::new(
            RefreshHint::from_secs(120).unwrap(),
            clock.clone(),
        ));
        let publisher = KeyPublisher::new(store.clone());

        let empty = publisher.fetch_keys().unwrap();
        assert!(empty.keys.is_empty());
        assert_eq!(empty.refresh_hint_seconds, 120);

        let k0 = SigningKey::generate(SigningAlgorithm::ES256, clock.now())
            .unwrap()
            .excluded_from_discovery();
        let k1 = SigningKey::generate(SigningAlgorithm::ES256, clock.now()).unwrap();
        store.install_verification_key(k0.clone()).unwrap();
        store.install_key(k1.clone()).unwrap();

        let published = publisher.fetch_keys().unwrap();
        assert_eq!(published.keys.len(), 2);
        assert!(published.find(k0.id().as_str()).unwrap().exclude_from_oidc_discovery);
        let active = published.find(k1.id().as_str()).unwrap();
        assert!(!active.exclude_from_oidc_discovery);
        assert_eq!(active.key, k1.public_key_der());
        assert_eq!(published.data_timestamp, store.current_snapshot().data_timestamp());
    }

    #[test]
    fn test_fetch_keys_is_idempotent() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(KeyStore::new(RefreshHint::DEFAULT, clock.clone()));
        store
            .install_key(SigningKey::generate(SigningAlgorithm::ES256, clock.now()).unwrap())
            .unwrap();
        let publisher = KeyPublisher::new(store);
        assert_eq!(publisher.fetch_keys().unwrap(), publisher.fetch_keys().unwrap());
    }
}
