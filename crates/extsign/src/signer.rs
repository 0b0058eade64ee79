//! JWT header construction and signing
//!
//! The signer never sees full tokens. The caller sends the claims segment, the
//! signer returns the header and signature segments, and the caller assembles
//! `header.claims.signature` itself.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::PluginError;
use crate::keys::SigningAlgorithm;
use crate::store::KeyStore;
use crate::{JWT_TYPE, Result};

/// JWT header with exactly the fields `alg`, `kid`, `typ`, in that order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JwtHeader {
    /// Signing algorithm
    pub alg: SigningAlgorithm,
    /// Key identifier
    pub kid: String,
    /// Token type, always `JWT`
    pub typ: String,
}

impl JwtHeader {
    /// Encode as unpadded base64url of the compact JSON serialization
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Signing`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| PluginError::Signing(format!("header serialization: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode an encoded header segment
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MalformedInput`] if the segment is not base64url JSON
    /// with exactly the three permitted fields.
    pub fn decode(segment: &str) -> Result<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| PluginError::malformed(format!("header is not base64url: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| PluginError::malformed(format!("header is not a JWT header: {e}")))
    }
}

/// Header and signature segments produced by [`Signer::sign`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeader {
    /// Unpadded base64url header segment
    pub header: String,
    /// Unpadded base64url signature segment
    pub signature: String,
}

impl SignedHeader {
    /// Assemble the compact token for `claims`
    #[must_use]
    pub fn to_token(&self, claims: &str) -> String {
        format!("{}.{}.{}", self.header, claims, self.signature)
    }
}

/// Answers signing requests from the current snapshot's active key
#[derive(Debug, Clone)]
pub struct Signer {
    store: Arc<KeyStore>,
}

impl Signer {
    /// Create a signer reading from `store`
    #[must_use]
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// Sign a claims segment
    ///
    /// Loads one snapshot up front and uses it for the whole call, so a rotation
    /// completing mid-call has no effect on the result.
    ///
    /// # Errors
    ///
    /// - [`PluginError::MalformedInput`] if `claims` is empty or not unpadded base64url
    /// - [`PluginError::NoSigningKey`] if there is no usable active key
    /// - [`PluginError::Signing`] if the signing backend fails
    pub fn sign(&self, claims: &str) -> Result<SignedHeader> {
        validate_claims_segment(claims)?;

        let snapshot = self.store.current_snapshot();
        let key = snapshot
            .active_signing_key()
            .map_err(|_| PluginError::NoSigningKey)?;
        if key.exclude_from_discovery() || !key.can_sign() {
            error!(
                kid = %key.id(),
                generation = snapshot.generation(),
                "Active key is verify-only; refusing to sign"
            );
            return Err(PluginError::NoSigningKey);
        }

        let header = JwtHeader {
            alg: key.algorithm(),
            kid: key.id().to_string(),
            typ: JWT_TYPE.to_string(),
        }
        .encode()?;

        let signing_input = format!("{header}.{claims}");
        let signature = key.sign(signing_input.as_bytes())?;

        debug!(kid = %key.id(), alg = %key.algorithm(), "Signed claims");
        Ok(SignedHeader { header, signature })
    }
}

fn validate_claims_segment(claims: &str) -> Result<()> {
    if claims.is_empty() {
        return Err(PluginError::malformed("claims segment is empty"));
    }
    URL_SAFE_NO_PAD
        .decode(claims)
        .map(|_| ())
        .map_err(|e| PluginError::malformed(format!("claims segment is not base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::keys::SigningKey;
    use crate::store::RefreshHint;
    use pretty_assertions::assert_eq;

    fn signer_with(algorithm: SigningAlgorithm) -> (Signer, Arc<KeyStore>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(KeyStore::new(RefreshHint::DEFAULT, clock.clone()));
        store
            .install_key(SigningKey::generate(algorithm, clock.now()).unwrap())
            .unwrap();
        (Signer::new(store.clone()), store)
    }

    #[test]
    fn test_header_serialization_is_exact() {
        let header = JwtHeader {
            alg: SigningAlgorithm::RS256,
            kid: "K1".to_string(),
            typ: JWT_TYPE.to_string(),
        };
        let json = URL_SAFE_NO_PAD.decode(header.encode().unwrap()).unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"{"alg":"RS256","kid":"K1","typ":"JWT"}"#
        );
    }

    #[test]
    fn test_header_decode_rejects_extra_fields() {
        let segment = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"K1","typ":"JWT","x5t":"a"}"#);
        assert!(JwtHeader::decode(&segment).is_err());
    }

    #[test]
    fn test_sign_uses_active_key() {
        let (signer, store) = signer_with(SigningAlgorithm::ES256);
        let signed = signer.sign("eyJmb28iOiJiYXIifQ").unwrap();

        let header = JwtHeader::decode(&signed.header).unwrap();
        let active = store.active_signing_key().unwrap();
        assert_eq!(header.kid, active.id().as_str());
        assert_eq!(header.alg, SigningAlgorithm::ES256);
        assert_eq!(header.typ, "JWT");

        let ok = jsonwebtoken::crypto::verify(
            &signed.signature,
            format!("{}.eyJmb28iOiJiYXIifQ", signed.header).as_bytes(),
            &active.decoding_key().unwrap(),
            jsonwebtoken::Algorithm::ES256,
        )
        .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_sign_rejects_malformed_claims() {
        let (signer, _) = signer_with(SigningAlgorithm::ES256);
        for bad in ["", "not base64!", "eyJmb28iOiJiYXIifQ==", "a.b", "+/+/"] {
            let err = signer.sign(bad).unwrap_err();
            assert!(
                matches!(err, PluginError::MalformedInput { .. }),
                "{bad:?} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_sign_without_key_fails_with_no_signing_key() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(KeyStore::new(RefreshHint::DEFAULT, clock));
        let signer = Signer::new(store);
        assert!(matches!(
            signer.sign("eyJmb28iOiJiYXIifQ").unwrap_err(),
            PluginError::NoSigningKey
        ));
    }

    #[test]
    fn test_signed_header_assembles_token() {
        let signed = SignedHeader {
            header: "h".into(),
            signature: "s".into(),
        };
        assert_eq!(signed.to_token("c"), "h.c.s");
    }
}
