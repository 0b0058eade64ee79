//! # extsign - External JWT Signing Plugin Core
//!
//! The signing half of a delegated service-account token issuer. A control-plane
//! caller hands the plugin the claims segment of a JWT; the plugin owns the private
//! keys, returns the header and signature, and publishes the public keys the caller
//! needs to verify tokens it did not sign itself.
//!
//! ## Architecture
//!
//! - `store` - [`KeyStore`] holding an immutable [`KeySnapshot`] swapped atomically
//! - `rotation` - [`RotationScheduler`], the single writer of the store
//! - `signer` - [`Signer`], builds the `{alg, kid, typ}` header and signs
//! - `publisher` - [`KeyPublisher`], the key-discovery view of a snapshot
//! - `metadata` - [`MetadataProvider`], the immutable token lifetime policy
//! - `plugin` - [`SigningPlugin`], wires the components together
//! - `keys` - key material, algorithms and key identifiers
//! - `verify` - compact JWT verification against published keys
//!
//! ## Example
//!
//! ```rust,no_run
//! use extsign::{PluginConfig, SigningPlugin};
//!
//! # async fn example() -> extsign::Result<()> {
//! let config = PluginConfig::builder()
//!     .max_token_expiration_seconds(3600)
//!     .refresh_hint_seconds(300)
//!     .build()?;
//!
//! let plugin = SigningPlugin::new(config)?;
//! plugin.bootstrap().await?;
//!
//! let signed = plugin.sign("eyJmb28iOiJiYXIifQ")?;
//! let published = plugin.fetch_keys()?;
//! extsign::verify::verify_compact(&signed.to_token("eyJmb28iOiJiYXIifQ"), &published)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod metadata;
pub mod plugin;
pub mod publisher;
pub mod rotation;
pub mod signer;
pub mod store;
pub mod verify;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
pub use config::{PluginConfig, PluginConfigBuilder};
pub use error::{ErrorKind, PluginError};
pub use keys::{KeyGenerator, KeyId, SigningAlgorithm, SigningKey, SoftwareKeyGenerator};
pub use metadata::{MaxTokenLifetime, Metadata, MetadataProvider};
pub use plugin::SigningPlugin;
pub use publisher::{KeyPublisher, PublicKeyRecord, PublishedKeys};
pub use rotation::{RotationHandle, RotationPolicy, RotationScheduler, TickOutcome};
pub use signer::{JwtHeader, SignedHeader, Signer};
pub use store::{KeySnapshot, KeyStatus, KeyStore, RefreshHint, RetiringKey};

/// Plugin result type
pub type Result<T> = std::result::Result<T, PluginError>;

/// The only `typ` value a signed header may carry
pub const JWT_TYPE: &str = "JWT";

/// Maximum length of a key identifier, in characters
pub const MAX_KEY_ID_LENGTH: usize = 1024;

/// Smallest token lifetime a caller accepts (10 minutes)
pub const MIN_TOKEN_EXPIRATION_SECONDS: i64 = 600;
