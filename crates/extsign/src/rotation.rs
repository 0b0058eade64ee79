//! Key rotation
//!
//! [`RotationScheduler`] is the only writer of the [`KeyStore`] after startup.
//! Each key moves one way through `Active -> Retiring -> Removed`: a rotation
//! installs a freshly generated key and demotes the previous one in the same
//! snapshot, and a retiring key is removed once its retirement age reaches
//! `max_token_lifetime + safety_margin`. By then every token it signed has
//! expired.
//!
//! Key generation runs on the blocking pool before the store's writer lock is
//! taken, so readers never wait on cryptography.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::clock::Clock;
use crate::error::PluginError;
use crate::keys::{KeyGenerator, KeyId, SigningAlgorithm};
use crate::metadata::MaxTokenLifetime;
use crate::store::{KeySnapshot, KeyStore};

/// When to rotate, when to remove, and how to retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Algorithm of newly generated keys
    pub algorithm: SigningAlgorithm,
    /// Age at which the active key is replaced
    pub rotation_interval: Duration,
    /// Period of the background check
    pub check_interval: Duration,
    /// Slack added to the max token lifetime before a retired key is removed
    pub safety_margin: Duration,
    /// Longest lifetime of any token signed by a retiring key
    pub max_token_lifetime: MaxTokenLifetime,
    /// First retry delay after a failed rotation
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay
    pub max_backoff: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::RS256,
            rotation_interval: Duration::from_secs(24 * 60 * 60),
            check_interval: Duration::from_secs(60),
            safety_margin: Duration::from_secs(5 * 60),
            max_token_lifetime: MaxTokenLifetime::DEFAULT,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RotationPolicy {
    /// Check the policy for internal consistency
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`] if an interval or backoff is
    /// zero, or the backoff bounds are inverted.
    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval.is_zero() {
            return Err(PluginError::config("rotation_interval must be positive"));
        }
        if self.check_interval.is_zero() {
            return Err(PluginError::config("check_interval must be positive"));
        }
        if self.initial_backoff.is_zero() {
            return Err(PluginError::config("initial_backoff must be positive"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(PluginError::config(format!(
                "max_backoff ({:?}) must not be shorter than initial_backoff ({:?})",
                self.max_backoff, self.initial_backoff
            )));
        }
        Ok(())
    }

    /// How long a retiring key stays published
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.max_token_lifetime.as_duration() + self.safety_margin
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Result of one scheduler check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Key installed by this tick, if a rotation was due
    pub rotated: Option<KeyId>,
    /// Retiring keys removed by this tick
    pub removed: Vec<KeyId>,
}

impl TickOutcome {
    /// Whether the tick changed the store
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.rotated.is_none() && self.removed.is_empty()
    }
}

/// Drives key rotation and retirement
#[derive(Debug)]
pub struct RotationScheduler {
    store: Arc<KeyStore>,
    generator: Arc<dyn KeyGenerator>,
    policy: RotationPolicy,
    clock: Arc<dyn Clock>,
    // one rotation or prune at a time
    in_flight: Mutex<()>,
}

impl RotationScheduler {
    /// Create a scheduler for `store`
    #[must_use]
    pub fn new(
        store: Arc<KeyStore>,
        generator: Arc<dyn KeyGenerator>,
        policy: RotationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            generator,
            policy,
            clock,
            in_flight: Mutex::new(()),
        }
    }

    /// The policy this scheduler enforces
    #[must_use]
    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Install the first signing key unless one is already active
    ///
    /// # Errors
    ///
    /// Propagates key generation and store errors. A failure here should abort
    /// startup.
    pub async fn bootstrap(&self) -> Result<Arc<KeySnapshot>> {
        let _guard = self.in_flight.lock().await;
        let current = self.store.current_snapshot();
        if current.active().is_some() {
            debug!("Key store already has an active key; skipping bootstrap");
            return Ok(current);
        }
        self.rotate_locked().await
    }

    /// Rotate immediately, regardless of the active key's age
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::KeyGeneration`] if no key could be generated, or a
    /// contract violation if the store rejected the new key. Either way the
    /// published snapshot is unchanged.
    pub async fn rotate_now(&self) -> Result<Arc<KeySnapshot>> {
        let _guard = self.in_flight.lock().await;
        self.rotate_locked().await
    }

    /// Remove every retiring key retired for longer than the grace period
    ///
    /// # Errors
    ///
    /// Propagates store errors; keys removed before the failure stay removed.
    pub async fn prune_expired(&self) -> Result<Vec<KeyId>> {
        let _guard = self.in_flight.lock().await;
        self.prune_locked()
    }

    /// Prune expired keys, then rotate if the active key is due
    ///
    /// Pruning does not depend on key generation, so expired keys are
    /// withdrawn even while rotation keeps failing.
    ///
    /// # Errors
    ///
    /// Returns the first prune or rotation error.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let _guard = self.in_flight.lock().await;
        let mut outcome = TickOutcome {
            removed: self.prune_locked()?,
            ..TickOutcome::default()
        };

        if self.rotation_due(self.clock.now()) {
            let snapshot = self.rotate_locked().await?;
            outcome.rotated = snapshot.active().map(|k| k.id().clone());
        }
        Ok(outcome)
    }

    /// Run the background loop until `cancel` fires
    ///
    /// Retryable failures back off exponentially between `initial_backoff` and
    /// `max_backoff`; readers keep the last good snapshot meanwhile.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = self.policy.initial_backoff;
        let mut delay = self.policy.check_interval;
        info!(
            interval = ?self.policy.rotation_interval,
            check = ?self.policy.check_interval,
            grace = ?self.policy.grace_period(),
            "Key rotation started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            match self.tick().await {
                Ok(outcome) => {
                    if !outcome.is_noop() {
                        debug!(?outcome, "Rotation tick changed key set");
                    }
                    backoff = self.policy.initial_backoff;
                    delay = self.policy.check_interval;
                }
                Err(err) if err.kind().is_retryable() => {
                    warn!(error = %err, retry_in = ?backoff, "Key rotation failed; retrying");
                    delay = backoff;
                    backoff = self.policy.next_backoff(backoff);
                }
                Err(err) => {
                    error!(error = %err, "Key rotation failed");
                    backoff = self.policy.initial_backoff;
                    delay = self.policy.check_interval;
                }
            }
        }

        info!("Key rotation stopped");
    }

    /// Spawn [`run`](Self::run) onto the current runtime
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> RotationHandle {
        let token = cancel.clone();
        let handle = tokio::spawn(async move { self.run(token).await });
        RotationHandle { handle, cancel }
    }

    fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        let Some(active) = self.store.current_snapshot().active().cloned() else {
            return true;
        };
        let age = (now - active.created_at()).to_std().unwrap_or_default();
        age >= self.policy.rotation_interval
    }

    async fn rotate_locked(&self) -> Result<Arc<KeySnapshot>> {
        let generator = Arc::clone(&self.generator);
        let algorithm = self.policy.algorithm;
        let created_at = self.clock.now();

        let key = tokio::task::spawn_blocking(move || generator.generate(algorithm, created_at))
            .await
            .map_err(|e| PluginError::KeyGeneration(format!("key generation task failed: {e}")))??;

        debug!(kid = %key.id(), %algorithm, "Generated signing key");
        self.store.install_key(key)
    }

    fn prune_locked(&self) -> Result<Vec<KeyId>> {
        let now = self.clock.now();
        let grace = self.policy.grace_period();
        let expired: Vec<KeyId> = self
            .store
            .current_snapshot()
            .retiring()
            .iter()
            .filter(|r| (now - r.since()).to_std().is_ok_and(|age| age > grace))
            .map(|r| r.key().id().clone())
            .collect();

        for id in &expired {
            self.store.remove_key(id)?;
        }
        Ok(expired)
    }
}

/// Handle to a spawned rotation loop
#[derive(Debug)]
pub struct RotationHandle {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl RotationHandle {
    /// Whether the loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            error!(error = %err, "Key rotation task panicked");
        }
    }
}
