//! Conversions between plugin types and the generated protobuf types
//!
//! Plugin to proto conversions are infallible. Proto to plugin conversions are
//! what a conformant caller does with a response, so they validate everything
//! the protocol promises and fail with [`GrpcError::InvalidResponse`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use extsign::verify::check_header;
use extsign::{
    JwtHeader, MAX_KEY_ID_LENGTH, MIN_TOKEN_EXPIRATION_SECONDS, Metadata, PublicKeyRecord,
    PublishedKeys, SignedHeader,
};

use crate::error::{GrpcError, GrpcResult};
use crate::proto;

// =============================================================================
// Timestamp
// =============================================================================

/// Convert a UTC time to a protobuf timestamp
#[must_use]
pub fn to_timestamp(time: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: time.timestamp(),
        nanos: i32::try_from(time.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

/// Convert a protobuf timestamp to a UTC time
///
/// # Errors
///
/// Returns [`GrpcError::InvalidResponse`] for out-of-range timestamps.
pub fn from_timestamp(ts: &prost_types::Timestamp) -> GrpcResult<DateTime<Utc>> {
    u32::try_from(ts.nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
        .ok_or_else(|| GrpcError::invalid_response(format!("timestamp out of range: {ts:?}")))
}

// =============================================================================
// Sign
// =============================================================================

impl From<SignedHeader> for proto::SignJwtResponse {
    fn from(signed: SignedHeader) -> Self {
        Self {
            header: signed.header,
            signature: signed.signature,
        }
    }
}

impl TryFrom<proto::SignJwtResponse> for SignedHeader {
    type Error = GrpcError;

    fn try_from(resp: proto::SignJwtResponse) -> GrpcResult<Self> {
        let header = JwtHeader::decode(&resp.header)
            .map_err(|e| GrpcError::invalid_response(e.to_string()))?;
        check_header(&header).map_err(|e| GrpcError::invalid_response(e.to_string()))?;
        if resp.signature.is_empty() {
            return Err(GrpcError::invalid_response("empty signature"));
        }
        Ok(Self {
            header: resp.header,
            signature: resp.signature,
        })
    }
}

// =============================================================================
// FetchKeys
// =============================================================================

impl From<PublicKeyRecord> for proto::Key {
    fn from(record: PublicKeyRecord) -> Self {
        Self {
            key_id: record.key_id,
            key: record.key,
            exclude_from_oidc_discovery: record.exclude_from_oidc_discovery,
        }
    }
}

impl From<PublishedKeys> for proto::FetchKeysResponse {
    fn from(published: PublishedKeys) -> Self {
        Self {
            keys: published.keys.into_iter().map(Into::into).collect(),
            data_timestamp: Some(to_timestamp(published.data_timestamp)),
            refresh_hint_seconds: published.refresh_hint_seconds,
        }
    }
}

impl TryFrom<proto::FetchKeysResponse> for PublishedKeys {
    type Error = GrpcError;

    fn try_from(resp: proto::FetchKeysResponse) -> GrpcResult<Self> {
        if resp.refresh_hint_seconds <= 0 {
            return Err(GrpcError::invalid_response(format!(
                "refresh_hint_seconds must be positive, got {}",
                resp.refresh_hint_seconds
            )));
        }
        let data_timestamp = resp
            .data_timestamp
            .as_ref()
            .ok_or_else(|| GrpcError::invalid_response("missing data_timestamp"))
            .and_then(from_timestamp)?;

        let mut seen = HashSet::with_capacity(resp.keys.len());
        let mut keys = Vec::with_capacity(resp.keys.len());
        for key in resp.keys {
            if key.key_id.is_empty() || key.key_id.chars().count() > MAX_KEY_ID_LENGTH {
                return Err(GrpcError::invalid_response(format!(
                    "key_id must be 1 to {MAX_KEY_ID_LENGTH} characters"
                )));
            }
            if !seen.insert(key.key_id.clone()) {
                return Err(GrpcError::invalid_response(format!(
                    "duplicate key_id {}",
                    key.key_id
                )));
            }
            if key.key.is_empty() {
                return Err(GrpcError::invalid_response(format!(
                    "key {} has no public key bytes",
                    key.key_id
                )));
            }
            keys.push(PublicKeyRecord {
                key_id: key.key_id,
                key: key.key,
                exclude_from_oidc_discovery: key.exclude_from_oidc_discovery,
            });
        }

        Ok(Self {
            keys,
            data_timestamp,
            refresh_hint_seconds: resp.refresh_hint_seconds,
        })
    }
}

// =============================================================================
// Metadata
// =============================================================================

impl From<Metadata> for proto::MetadataResponse {
    fn from(metadata: Metadata) -> Self {
        Self {
            max_token_expiration_seconds: metadata.max_token_expiration_seconds,
        }
    }
}

impl TryFrom<proto::MetadataResponse> for Metadata {
    type Error = GrpcError;

    fn try_from(resp: proto::MetadataResponse) -> GrpcResult<Self> {
        if resp.max_token_expiration_seconds < MIN_TOKEN_EXPIRATION_SECONDS {
            return Err(GrpcError::invalid_response(format!(
                "max_token_expiration_seconds must be at least {MIN_TOKEN_EXPIRATION_SECONDS}, got {}",
                resp.max_token_expiration_seconds
            )));
        }
        Ok(Self {
            max_token_expiration_seconds: resp.max_token_expiration_seconds,
        })
    }
}
