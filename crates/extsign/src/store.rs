//! Key store and snapshot publication
//!
//! [`KeyStore`] owns every key the plugin knows about. Readers load an immutable
//! [`KeySnapshot`] through an [`ArcSwap`] without taking any lock; the single
//! writer builds a complete replacement snapshot under a writer lock and swaps
//! it in, so a reader sees either the fully-old or the fully-new key set.
//!
//! # Lifecycle
//!
//! ```text
//! install_key ──► Active ──(next install_key / retire_key)──► Retiring ──remove_key──► Removed
//! install_verification_key ───────────────────────────────────► Retiring
//! ```
//!
//! The snapshot stores the active key separately from the retiring keys, so a
//! published state with two active keys cannot be expressed. Removed key ids
//! are tombstoned and can never be installed again.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::PluginError;
use crate::keys::{KeyId, SigningKey};
use crate::Result;

/// Lifecycle status of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyStatus {
    /// The current signing key
    Active,
    /// Published for verification only, awaiting removal
    Retiring {
        /// When the key stopped being used for new signatures
        since: DateTime<Utc>,
    },
    /// Permanently withdrawn from publication
    Removed {
        /// When the key was removed
        at: DateTime<Utc>,
    },
}

/// Caller-facing re-poll interval in whole seconds; always positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RefreshHint(NonZeroU32);

impl RefreshHint {
    /// Default re-poll interval (5 minutes)
    pub const DEFAULT: Self = match NonZeroU32::new(300) {
        Some(secs) => Self(secs),
        None => unreachable!(),
    };

    /// Validate a refresh hint
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`] unless `secs` is a positive
    /// value that fits in 32 bits.
    pub fn from_secs(secs: i64) -> Result<Self> {
        u32::try_from(secs)
            .ok()
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or_else(|| {
                PluginError::config(format!(
                    "refresh_hint_seconds must be a positive integer, got {secs}"
                ))
            })
    }

    /// Hint in seconds, as sent on the wire
    #[must_use]
    pub fn as_secs(self) -> i64 {
        i64::from(self.0.get())
    }
}

impl Default for RefreshHint {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for RefreshHint {
    type Error = PluginError;

    fn try_from(secs: i64) -> Result<Self> {
        Self::from_secs(secs)
    }
}

impl From<RefreshHint> for i64 {
    fn from(hint: RefreshHint) -> Self {
        hint.as_secs()
    }
}

/// A key published for verification only
#[derive(Debug, Clone)]
pub struct RetiringKey {
    key: Arc<SigningKey>,
    since: DateTime<Utc>,
}

impl RetiringKey {
    /// The key
    #[must_use]
    pub fn key(&self) -> &Arc<SigningKey> {
        &self.key
    }

    /// When the key entered the retiring state
    #[must_use]
    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }
}

/// Immutable, point-in-time view of the key set
#[derive(Debug)]
pub struct KeySnapshot {
    generation: u64,
    active: Option<Arc<SigningKey>>,
    retiring: Vec<RetiringKey>,
    data_timestamp: DateTime<Utc>,
    refresh_hint: RefreshHint,
}

impl KeySnapshot {
    fn empty(data_timestamp: DateTime<Utc>, refresh_hint: RefreshHint) -> Self {
        Self {
            generation: 0,
            active: None,
            retiring: Vec::new(),
            data_timestamp,
            refresh_hint,
        }
    }

    /// Mutation counter; 0 for the initial empty snapshot
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this snapshot was produced
    #[must_use]
    pub fn data_timestamp(&self) -> DateTime<Utc> {
        self.data_timestamp
    }

    /// Advised re-poll interval
    #[must_use]
    pub fn refresh_hint(&self) -> RefreshHint {
        self.refresh_hint
    }

    /// The active key, if the store has been bootstrapped
    #[must_use]
    pub fn active(&self) -> Option<&Arc<SigningKey>> {
        self.active.as_ref()
    }

    /// The active key
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NoActiveKey`] before the first key is installed.
    pub fn active_signing_key(&self) -> Result<Arc<SigningKey>> {
        self.active.clone().ok_or(PluginError::NoActiveKey)
    }

    /// Keys published for verification only
    #[must_use]
    pub fn retiring(&self) -> &[RetiringKey] {
        &self.retiring
    }

    /// Every published key with its status, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<(Arc<SigningKey>, KeyStatus)> {
        let mut entries: Vec<_> = self
            .retiring
            .iter()
            .map(|r| {
                (
                    Arc::clone(&r.key),
                    KeyStatus::Retiring { since: r.since },
                )
            })
            .chain(self.active.iter().map(|k| (Arc::clone(k), KeyStatus::Active)))
            .collect();
        entries.sort_by(|(a, _), (b, _)| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        entries
    }

    /// Number of published keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.retiring.len() + usize::from(self.active.is_some())
    }

    /// Whether no key is published
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status of a published key
    #[must_use]
    pub fn status_of(&self, id: &KeyId) -> Option<KeyStatus> {
        if self.active.as_ref().is_some_and(|k| k.id() == id) {
            return Some(KeyStatus::Active);
        }
        self.retiring
            .iter()
            .find(|r| r.key.id() == id)
            .map(|r| KeyStatus::Retiring { since: r.since })
    }

    /// Whether a key with this id is published
    #[must_use]
    pub fn contains(&self, id: &KeyId) -> bool {
        self.status_of(id).is_some()
    }

    fn ids(&self) -> impl Iterator<Item = &KeyId> {
        self.active
            .iter()
            .map(|k| k.id())
            .chain(self.retiring.iter().map(|r| r.key.id()))
    }

    fn check_unique_ids(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.len());
        for id in self.ids() {
            if !seen.insert(id) {
                return Err(PluginError::contract(format!(
                    "duplicate key id {id} in snapshot"
                )));
            }
        }
        Ok(())
    }
}

/// Writer-side state that never needs to be visible to readers
#[derive(Debug, Default)]
struct WriterState {
    removed: HashMap<KeyId, DateTime<Utc>>,
}

/// Mutable draft of the next snapshot
struct Draft {
    active: Option<Arc<SigningKey>>,
    retiring: Vec<RetiringKey>,
}

/// Holder of all known keys and the currently published snapshot
#[derive(Debug)]
pub struct KeyStore {
    current: ArcSwap<KeySnapshot>,
    writer: Mutex<WriterState>,
    clock: Arc<dyn Clock>,
}

impl KeyStore {
    /// Create an empty store
    #[must_use]
    pub fn new(refresh_hint: RefreshHint, clock: Arc<dyn Clock>) -> Self {
        let initial = KeySnapshot::empty(clock.now(), refresh_hint);
        Self {
            current: ArcSwap::from_pointee(initial),
            writer: Mutex::new(WriterState::default()),
            clock,
        }
    }

    /// The currently published snapshot; lock-free
    #[must_use]
    pub fn current_snapshot(&self) -> Arc<KeySnapshot> {
        self.current.load_full()
    }

    /// The current signing key
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NoActiveKey`] if no key has been installed.
    pub fn active_signing_key(&self) -> Result<Arc<SigningKey>> {
        self.current.load().active_signing_key()
    }

    /// Lifecycle status of any key ever installed
    #[must_use]
    pub fn key_status(&self, id: &KeyId) -> Option<KeyStatus> {
        if let Some(status) = self.current.load().status_of(id) {
            return Some(status);
        }
        self.writer
            .lock()
            .removed
            .get(id)
            .map(|at| KeyStatus::Removed { at: *at })
    }

    /// Install `key` as the active signing key
    ///
    /// The previous active key, if any, is demoted to retiring in the same
    /// published snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ContractViolation`] if the key is verify-only, has
    /// no private material, or reuses a present or removed key id.
    pub fn install_key(&self, key: SigningKey) -> Result<Arc<KeySnapshot>> {
        if key.exclude_from_discovery() || !key.can_sign() {
            return Err(PluginError::contract(format!(
                "key {} is verify-only and cannot become the active key",
                key.id()
            )));
        }
        let key = Arc::new(key);
        let id = key.id().clone();

        let snapshot = self.publish("install", |draft, state, now| {
            ensure_fresh_id(draft, state, &id)?;
            if let Some(previous) = draft.active.as_ref().map(|k| k.id().clone()) {
                retire_in_draft(draft, &previous, now)?;
            }
            draft.active = Some(Arc::clone(&key));
            Ok(true)
        })?;

        info!(kid = %id, alg = %key.algorithm(), generation = snapshot.generation(), "Installed active signing key");
        Ok(snapshot)
    }

    /// Install a verify-only key directly in the retiring state
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ContractViolation`] if the key is not excluded from
    /// discovery or reuses a present or removed key id.
    pub fn install_verification_key(&self, key: SigningKey) -> Result<Arc<KeySnapshot>> {
        if !key.exclude_from_discovery() {
            return Err(PluginError::contract(format!(
                "verification key {} must be excluded from discovery",
                key.id()
            )));
        }
        let key = Arc::new(key);
        let id = key.id().clone();

        let snapshot = self.publish("install_verification", |draft, state, now| {
            ensure_fresh_id(draft, state, &id)?;
            draft.retiring.push(RetiringKey {
                key: Arc::clone(&key),
                since: now,
            });
            Ok(true)
        })?;

        info!(kid = %id, generation = snapshot.generation(), "Installed verify-only key");
        Ok(snapshot)
    }

    /// Demote a key to retiring
    ///
    /// Retiring an already retiring key succeeds without publishing a new
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ContractViolation`] for unknown ids and for the
    /// active key, since the store never publishes a bootstrapped state without
    /// an active key. The active key is demoted by
    /// [`install_key`](Self::install_key) together with its replacement.
    pub fn retire_key(&self, id: &KeyId) -> Result<Arc<KeySnapshot>> {
        self.publish("retire", |draft, _state, now| {
            if draft.active.as_ref().is_some_and(|k| k.id() == id) {
                return Err(PluginError::contract(format!(
                    "cannot retire active key {id} without installing a replacement"
                )));
            }
            retire_in_draft(draft, id, now)
        })
    }

    /// Permanently remove a retiring key
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ContractViolation`] if the key is active or not
    /// published.
    pub fn remove_key(&self, id: &KeyId) -> Result<Arc<KeySnapshot>> {
        let snapshot = self.publish("remove", |draft, state, now| {
            if draft.active.as_ref().is_some_and(|k| k.id() == id) {
                return Err(PluginError::contract(format!(
                    "cannot remove active key {id}"
                )));
            }
            let index = draft
                .retiring
                .iter()
                .position(|r| r.key.id() == id)
                .ok_or_else(|| PluginError::contract(format!("cannot remove unknown key {id}")))?;
            draft.retiring.remove(index);
            state.removed.insert(id.clone(), now);
            Ok(true)
        })?;

        info!(kid = %id, generation = snapshot.generation(), "Removed retired key from publication");
        Ok(snapshot)
    }

    /// Build the next snapshot under the writer lock and publish it atomically
    ///
    /// `mutate` sees a draft of the current snapshot and reports whether it
    /// changed anything. If it fails, or the result breaks key id uniqueness,
    /// nothing is published and the writer state is left untouched. An
    /// unchanged draft returns the current snapshot as is.
    fn publish<F>(&self, op: &'static str, mutate: F) -> Result<Arc<KeySnapshot>>
    where
        F: FnOnce(&mut Draft, &mut WriterState, DateTime<Utc>) -> Result<bool>,
    {
        let mut state = self.writer.lock();
        let current = self.current.load_full();
        let now = self.clock.now();

        let mut draft = Draft {
            active: current.active.clone(),
            retiring: current.retiring.clone(),
        };
        let mut staged = WriterState {
            removed: state.removed.clone(),
        };
        if !mutate(&mut draft, &mut staged, now)? {
            return Ok(current);
        }

        // strictly increasing across generations even if the clock stalls or steps back
        let floor = current.data_timestamp + chrono::Duration::microseconds(1);
        let next = Arc::new(KeySnapshot {
            generation: current.generation + 1,
            active: draft.active,
            retiring: draft.retiring,
            data_timestamp: now.max(floor),
            refresh_hint: current.refresh_hint,
        });

        if let Err(err) = next.check_unique_ids() {
            error!(op, error = %err, "Refusing to publish inconsistent key snapshot");
            return Err(err);
        }

        *state = staged;
        self.current.store(Arc::clone(&next));
        Ok(next)
    }
}

/// Move `id` from active to retiring; `Ok(false)` if it is already retiring
fn retire_in_draft(draft: &mut Draft, id: &KeyId, now: DateTime<Utc>) -> Result<bool> {
    if draft.active.as_ref().is_some_and(|k| k.id() == id) {
        if let Some(key) = draft.active.take() {
            info!(kid = %id, "Demoting active key to retiring");
            draft.retiring.push(RetiringKey { key, since: now });
        }
        return Ok(true);
    }
    if draft.retiring.iter().any(|r| r.key.id() == id) {
        return Ok(false);
    }
    Err(PluginError::contract(format!(
        "cannot retire unknown key {id}"
    )))
}

fn ensure_fresh_id(draft: &Draft, state: &WriterState, id: &KeyId) -> Result<()> {
    let present = draft.active.as_ref().is_some_and(|k| k.id() == id)
        || draft.retiring.iter().any(|r| r.key.id() == id);
    if present {
        return Err(PluginError::contract(format!(
            "key id {id} is already published"
        )));
    }
    if state.removed.contains_key(id) {
        return Err(PluginError::contract(format!(
            "key id {id} was removed and cannot be reused"
        )));
    }
    Ok(())
}
