//! Compact JWT verification against published keys
//!
//! This is what a conformant caller does with a token: split it, check that the
//! header is exactly `{alg, kid, typ: "JWT"}`, look the `kid` up in the most
//! recent FetchKeys response and verify the signature with that key.

use jsonwebtoken::crypto;

use crate::error::PluginError;
use crate::keys::decoding_key_from_spki;
use crate::publisher::PublishedKeys;
use crate::signer::JwtHeader;
use crate::{JWT_TYPE, MAX_KEY_ID_LENGTH, Result};

/// Verify a compact token and return its decoded header
///
/// Claims are not inspected; expiry and audience checks belong to the caller.
///
/// # Errors
///
/// - [`PluginError::MalformedInput`] if the token is not three segments or the
///   header is not exactly `{alg, kid, typ: "JWT"}`
/// - [`PluginError::VerificationFailed`] if the `kid` is not published or the
///   signature does not match
pub fn verify_compact(token: &str, published: &PublishedKeys) -> Result<JwtHeader> {
    let mut parts = token.split('.');
    let (Some(header_segment), Some(claims), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(PluginError::malformed("token must have exactly three segments"));
    };

    let header = JwtHeader::decode(header_segment)?;
    check_header(&header)?;

    let record = published.find(&header.kid).ok_or_else(|| {
        PluginError::VerificationFailed(format!("kid {} is not published", header.kid))
    })?;
    let key = decoding_key_from_spki(header.alg, &record.key)?;

    let message = format!("{header_segment}.{claims}");
    if crypto::verify(signature, message.as_bytes(), &key, header.alg.to_jwt())? {
        Ok(header)
    } else {
        Err(PluginError::VerificationFailed(format!(
            "signature does not match key {}",
            header.kid
        )))
    }
}

/// Check a decoded header the way a conformant caller does
///
/// # Errors
///
/// Returns [`PluginError::MalformedInput`] for a wrong `typ` or an empty or
/// oversized `kid`.
pub fn check_header(header: &JwtHeader) -> Result<()> {
    if header.typ != JWT_TYPE {
        return Err(PluginError::malformed(format!(
            "header typ must be {JWT_TYPE}, got {}",
            header.typ
        )));
    }
    if header.kid.is_empty() || header.kid.chars().count() > MAX_KEY_ID_LENGTH {
        return Err(PluginError::malformed("header kid is empty or too long"));
    }
    Ok(())
}
