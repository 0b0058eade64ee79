//! Key material, algorithms and key identifiers
//!
//! A [`SigningKey`] is immutable once built: lifecycle status lives in the
//! [`KeySnapshot`](crate::KeySnapshot) that holds it, never in the key itself.
//! Public material is kept as PKIX `SubjectPublicKeyInfo` DER, the encoding
//! published to callers. Private material is held only as a jsonwebtoken
//! [`EncodingKey`] and is never exposed or printed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::PluginError;
use crate::{MAX_KEY_ID_LENGTH, Result};

/// Default RSA modulus size for generated keys
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Signing algorithms a published header may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with PKCS#1 v1.5 padding and SHA-256 (RFC 7518)
    #[serde(rename = "RS256")]
    RS256,

    /// RSA with PSS padding and SHA-256 (RFC 7518)
    #[serde(rename = "PS256")]
    PS256,

    /// ECDSA with the P-256 curve and SHA-256 (RFC 7518)
    #[serde(rename = "ES256")]
    ES256,
}

impl SigningAlgorithm {
    /// Every algorithm the plugin accepts
    pub const ALL: [Self; 3] = [Self::RS256, Self::PS256, Self::ES256];

    /// Algorithm name as it appears in the `alg` header field
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::PS256 => "PS256",
            Self::ES256 => "ES256",
        }
    }

    /// Whether the algorithm uses an RSA key
    #[must_use]
    pub fn is_rsa(self) -> bool {
        matches!(self, Self::RS256 | Self::PS256)
    }

    /// Equivalent jsonwebtoken algorithm
    #[must_use]
    pub fn to_jwt(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::PS256 => Algorithm::PS256,
            Self::ES256 => Algorithm::ES256,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| PluginError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// Key identifier carried in the `kid` header field
///
/// Non-empty and at most [`MAX_KEY_ID_LENGTH`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(Arc<str>);

impl KeyId {
    /// Validate and wrap a key identifier
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`] if the id is empty or too long.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(PluginError::config("key id must not be empty"));
        }
        let len = id.chars().count();
        if len > MAX_KEY_ID_LENGTH {
            return Err(PluginError::config(format!(
                "key id is {len} characters, maximum is {MAX_KEY_ID_LENGTH}"
            )));
        }
        Ok(Self(id.into()))
    }

    /// Derive the id of a public key: unpadded base64url SHA-256 of its SPKI DER
    #[must_use]
    pub fn from_public_key_der(spki_der: &[u8]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(Sha256::digest(spki_der)).into())
    }

    /// The id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KeyId {
    type Error = PluginError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0.to_string()
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
struct PrivateKey {
    encoding_key: EncodingKey,
}

/// One key pair plus metadata
///
/// Verify-only keys carry no private material and are always excluded from
/// discovery; they can never be installed as the active signing key.
#[derive(Clone)]
pub struct SigningKey {
    id: KeyId,
    algorithm: SigningAlgorithm,
    public_key_der: Arc<[u8]>,
    private_key: Option<PrivateKey>,
    exclude_from_discovery: bool,
    created_at: DateTime<Utc>,
}

impl SigningKey {
    /// Generate a fresh key pair for `algorithm`
    ///
    /// RSA generation is CPU heavy; async callers should run this on the
    /// blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::KeyGeneration`] if the key pair cannot be produced or
    /// encoded.
    pub fn generate(algorithm: SigningAlgorithm, created_at: DateTime<Utc>) -> Result<Self> {
        Self::generate_with_rsa_bits(algorithm, created_at, DEFAULT_RSA_BITS)
    }

    fn generate_with_rsa_bits(
        algorithm: SigningAlgorithm,
        created_at: DateTime<Utc>,
        rsa_bits: usize,
    ) -> Result<Self> {
        let (encoding_key, public_key_der) = if algorithm.is_rsa() {
            let private_key = RsaPrivateKey::new(&mut OsRng, rsa_bits)
                .map_err(|e| PluginError::KeyGeneration(format!("RSA: {e}")))?;
            let pem: Zeroizing<String> = private_key
                .to_pkcs1_pem(LineEnding::LF)
                .map_err(|e| PluginError::KeyGeneration(format!("RSA PEM encoding: {e}")))?;
            let public_der = RsaPublicKey::from(&private_key)
                .to_public_key_der()
                .map_err(|e| PluginError::KeyGeneration(format!("RSA SPKI encoding: {e}")))?;
            (
                EncodingKey::from_rsa_pem(pem.as_bytes())?,
                public_der.into_vec(),
            )
        } else {
            let secret = p256::SecretKey::random(&mut OsRng);
            let pem: Zeroizing<String> = secret
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| PluginError::KeyGeneration(format!("P-256 PEM encoding: {e}")))?;
            let public_der = secret
                .public_key()
                .to_public_key_der()
                .map_err(|e| PluginError::KeyGeneration(format!("P-256 SPKI encoding: {e}")))?;
            (
                EncodingKey::from_ec_pem(pem.as_bytes())?,
                public_der.into_vec(),
            )
        };

        Ok(Self {
            id: KeyId::from_public_key_der(&public_key_der),
            algorithm,
            public_key_der: public_key_der.into(),
            private_key: Some(PrivateKey { encoding_key }),
            exclude_from_discovery: false,
            created_at,
        })
    }

    /// Build a verify-only key from a PEM public key
    ///
    /// Accepts `PUBLIC KEY` (SPKI, RSA or P-256) and `RSA PUBLIC KEY` (PKCS#1)
    /// documents. The key is excluded from discovery and carries no private
    /// material. Without an explicit `id` the key id is derived from the SPKI DER.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::KeyUnavailable`] if the PEM cannot be parsed as an
    /// RSA or P-256 public key.
    pub fn verification_only_from_pem(
        pem: &str,
        id: Option<KeyId>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let (algorithm, public_key_der) = if let Ok(rsa) = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        {
            let der = rsa
                .to_public_key_der()
                .map_err(|e| PluginError::KeyUnavailable(format!("RSA SPKI encoding: {e}")))?;
            (SigningAlgorithm::RS256, der.into_vec())
        } else {
            let ec = p256::PublicKey::from_public_key_pem(pem).map_err(|e| {
                PluginError::KeyUnavailable(format!("not an RSA or P-256 public key: {e}"))
            })?;
            let der = ec
                .to_public_key_der()
                .map_err(|e| PluginError::KeyUnavailable(format!("P-256 SPKI encoding: {e}")))?;
            (SigningAlgorithm::ES256, der.into_vec())
        };

        Ok(Self {
            id: id.unwrap_or_else(|| KeyId::from_public_key_der(&public_key_der)),
            algorithm,
            public_key_der: public_key_der.into(),
            private_key: None,
            exclude_from_discovery: true,
            created_at,
        })
    }

    /// Replace the derived key id
    #[must_use]
    pub fn with_id(mut self, id: KeyId) -> Self {
        self.id = id;
        self
    }

    /// Mark the key as verify-only (excluded from discovery)
    #[must_use]
    pub fn excluded_from_discovery(mut self) -> Self {
        self.exclude_from_discovery = true;
        self
    }

    /// Key identifier
    #[must_use]
    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// Algorithm the key signs with
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// PKIX `SubjectPublicKeyInfo` DER encoding of the public key
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Whether the key is verify-only
    #[must_use]
    pub fn exclude_from_discovery(&self) -> bool {
        self.exclude_from_discovery
    }

    /// Whether the key holds private material
    #[must_use]
    pub fn can_sign(&self) -> bool {
        self.private_key.is_some()
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sign `message`, returning the unpadded base64url signature
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ContractViolation`] for a verify-only key and
    /// [`PluginError::Signing`] if the backend fails.
    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let private = self.private_key.as_ref().ok_or_else(|| {
            PluginError::contract(format!("key {} has no private material", self.id))
        })?;
        Ok(jsonwebtoken::crypto::sign(
            message,
            &private.encoding_key,
            self.algorithm.to_jwt(),
        )?)
    }

    /// Decoding key for verifying signatures made with this key's public half
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::KeyUnavailable`] if the stored DER cannot be decoded.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        decoding_key_from_spki(self.algorithm, &self.public_key_der)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("exclude_from_discovery", &self.exclude_from_discovery)
            .field("can_sign", &self.can_sign())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Build a jsonwebtoken [`DecodingKey`] from SPKI DER for the family of `algorithm`
///
/// # Errors
///
/// Returns [`PluginError::KeyUnavailable`] if the DER is not a key of the
/// algorithm's family.
pub fn decoding_key_from_spki(algorithm: SigningAlgorithm, spki_der: &[u8]) -> Result<DecodingKey> {
    if algorithm.is_rsa() {
        let public = RsaPublicKey::from_public_key_der(spki_der)
            .map_err(|e| PluginError::KeyUnavailable(format!("RSA public key: {e}")))?;
        let pkcs1 = public
            .to_pkcs1_der()
            .map_err(|e| PluginError::KeyUnavailable(format!("RSA PKCS#1 encoding: {e}")))?;
        Ok(DecodingKey::from_rsa_der(pkcs1.as_bytes()))
    } else {
        let public = p256::PublicKey::from_public_key_der(spki_der)
            .map_err(|e| PluginError::KeyUnavailable(format!("P-256 public key: {e}")))?;
        Ok(DecodingKey::from_ec_der(
            public.to_encoded_point(false).as_bytes(),
        ))
    }
}

/// Source of fresh signing keys
///
/// The rotation scheduler calls this on the blocking pool, so implementations
/// may do CPU heavy or blocking work.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Generate a new key pair for `algorithm`
    ///
    /// # Errors
    ///
    /// Returns an error of kind [`Transient`](crate::ErrorKind::Transient) when
    /// generation fails and may succeed on retry.
    fn generate(&self, algorithm: SigningAlgorithm, created_at: DateTime<Utc>)
    -> Result<SigningKey>;
}

/// In-process key generator backed by the `rsa` and `p256` crates
#[derive(Debug, Clone, Copy)]
pub struct SoftwareKeyGenerator {
    rsa_bits: usize,
}

impl SoftwareKeyGenerator {
    /// Generator producing 2048-bit RSA keys
    #[must_use]
    pub fn new() -> Self {
        Self {
            rsa_bits: DEFAULT_RSA_BITS,
        }
    }

    /// Override the RSA modulus size
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidConfiguration`] for moduli under 2048 bits.
    pub fn with_rsa_bits(rsa_bits: usize) -> Result<Self> {
        if rsa_bits < DEFAULT_RSA_BITS {
            return Err(PluginError::config(format!(
                "RSA keys must be at least {DEFAULT_RSA_BITS} bits, got {rsa_bits}"
            )));
        }
        Ok(Self { rsa_bits })
    }
}

impl Default for SoftwareKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for SoftwareKeyGenerator {
    fn generate(
        &self,
        algorithm: SigningAlgorithm,
        created_at: DateTime<Utc>,
    ) -> Result<SigningKey> {
        SigningKey::generate_with_rsa_bits(algorithm, created_at, self.rsa_bits)
    }
}
