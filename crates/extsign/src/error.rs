//! Plugin error types
//!
//! Every request-time failure carries an [`ErrorKind`] so the transport layer and
//! tests can branch on the class of failure rather than on message text.

use thiserror::Error;

/// Class of a [`PluginError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Misconfiguration or missing signing key; fatal at startup
    Configuration,
    /// Malformed request input; the caller decides whether to retry
    Validation,
    /// Temporary unavailability of key material or the signing backend
    Transient,
    /// An internal invariant was broken; fails the single request
    ContractViolation,
}

impl ErrorKind {
    /// Whether a caller may retry the same request with backoff
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Errors produced by the signing plugin
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Match on [`PluginError::kind`]
/// when only the class of failure matters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// Claims segment is not a valid unpadded base64url string
    #[error("Malformed input: {reason}")]
    MalformedInput {
        /// What was wrong with the input
        reason: String,
    },

    /// Algorithm not in the allowed set
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A token failed verification against the published keys
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// The key store holds no active key
    #[error("No active key in key store")]
    NoActiveKey,

    /// No key is available for signing
    #[error("No signing key available")]
    NoSigningKey,

    /// A configuration value violates the contract
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Key pair generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// The signing backend failed to produce a signature
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Key material could not be loaded or decoded
    #[error("Key material unavailable: {0}")]
    KeyUnavailable(String),

    /// An internal invariant was broken
    #[error("Contract violation: {0}")]
    ContractViolation(String),
}

impl PluginError {
    /// Create a malformed input error
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a contract violation error
    #[must_use]
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }

    /// Class of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedInput { .. }
            | Self::UnsupportedAlgorithm(_)
            | Self::VerificationFailed(_) => ErrorKind::Validation,
            Self::NoActiveKey | Self::NoSigningKey | Self::InvalidConfiguration(_) => {
                ErrorKind::Configuration
            }
            Self::KeyGeneration(_) | Self::Signing(_) | Self::KeyUnavailable(_) => {
                ErrorKind::Transient
            }
            Self::ContractViolation(_) => ErrorKind::ContractViolation,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for PluginError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtErrorKind;

        match err.kind() {
            JwtErrorKind::InvalidRsaKey(_)
            | JwtErrorKind::InvalidEcdsaKey
            | JwtErrorKind::InvalidKeyFormat => Self::KeyUnavailable(err.to_string()),
            JwtErrorKind::InvalidSignature => Self::VerificationFailed(err.to_string()),
            JwtErrorKind::InvalidAlgorithm | JwtErrorKind::InvalidAlgorithmName => {
                Self::UnsupportedAlgorithm(err.to_string())
            }
            _ => Self::Signing(err.to_string()),
        }
    }
}
