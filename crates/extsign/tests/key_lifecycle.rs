//! Key lifecycle integration tests
//!
//! End-to-end behavior of a plugin as a control-plane caller sees it:
//! - Startup: one active key, metadata and refresh hint as configured
//! - Rotation: old key keeps verifying while new tokens use the new key
//! - Legacy verify-only keys are published but never sign
//! - Misconfiguration is rejected before anything is served
//! - Retired keys disappear only after the grace period

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use extsign::verify::verify_compact;
use extsign::{
    ErrorKind, KeyId, KeyStatus, ManualClock, PluginConfig, PluginError, SigningAlgorithm,
    SigningPlugin, SoftwareKeyGenerator,
};
use pretty_assertions::assert_eq;
use rsa::pkcs8::{EncodePublicKey, LineEnding};

const CLAIMS: &str = "eyJpc3MiOiJodHRwczovL2t1YmVybmV0ZXMuZGVmYXVsdC5zdmMiLCJzdWIiOiJzeXN0ZW06c2VydmljZWFjY291bnQ6ZGVmYXVsdDpkZWZhdWx0In0";

fn plugin(config: PluginConfig) -> (SigningPlugin, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let plugin = SigningPlugin::with_parts(
        config,
        clock.clone(),
        Arc::new(SoftwareKeyGenerator::new()),
    )
    .expect("valid plugin");
    (plugin, clock)
}

fn header_json(segment: &str) -> String {
    String::from_utf8(URL_SAFE_NO_PAD.decode(segment).expect("base64url header"))
        .expect("utf-8 header")
}

/// Startup: metadata, a single published key, and a verifiable RS256 token
#[tokio::test]
async fn test_startup_publishes_single_key() {
    let config = PluginConfig::builder()
        .max_token_expiration_seconds(3600)
        .refresh_hint_seconds(300)
        .algorithm(SigningAlgorithm::RS256)
        .build()
        .unwrap();
    let (plugin, _) = plugin(config);
    plugin.bootstrap().await.unwrap();

    assert_eq!(plugin.metadata().max_token_expiration_seconds, 3600);

    let published = plugin.fetch_keys().unwrap();
    assert_eq!(published.refresh_hint_seconds, 300);
    assert_eq!(published.keys.len(), 1);
    let k1 = &published.keys[0];
    assert!(!k1.exclude_from_oidc_discovery);

    let signed = plugin.sign(CLAIMS).unwrap();
    assert_eq!(
        header_json(&signed.header),
        format!(r#"{{"alg":"RS256","kid":"{}","typ":"JWT"}}"#, k1.key_id)
    );
    verify_compact(&signed.to_token(CLAIMS), &published).unwrap();
}

/// Rotation: K1 retiring, K2 active, both published, tokens from both verify
#[tokio::test]
async fn test_rotation_keeps_previous_key_published() {
    let config = PluginConfig::builder()
        .algorithm(SigningAlgorithm::ES256)
        .build()
        .unwrap();
    let (plugin, clock) = plugin(config);
    plugin.bootstrap().await.unwrap();

    let before = plugin.sign(CLAIMS).unwrap().to_token(CLAIMS);
    let k1 = plugin.store().active_signing_key().unwrap().id().clone();

    clock.advance(Duration::from_secs(60));
    plugin.scheduler().rotate_now().await.unwrap();
    let k2 = plugin.store().active_signing_key().unwrap().id().clone();

    let published = plugin.fetch_keys().unwrap();
    let ids: Vec<_> = published.keys.iter().map(|k| k.key_id.as_str()).collect();
    assert_eq!(ids, vec![k1.as_str(), k2.as_str()]);

    let after = plugin.sign(CLAIMS).unwrap().to_token(CLAIMS);
    assert_eq!(verify_compact(&after, &published).unwrap().kid, k2.as_str());
    assert_eq!(verify_compact(&before, &published).unwrap().kid, k1.as_str());
}

/// Legacy exclusion: K0 is published with the exclusion flag and never signs
#[tokio::test]
async fn test_legacy_key_never_signs() {
    let config = PluginConfig::builder()
        .algorithm(SigningAlgorithm::ES256)
        .build()
        .unwrap();
    let (plugin, _) = plugin(config);

    let legacy_pem = p256::SecretKey::random(&mut rand::rngs::OsRng)
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let k0 = plugin
        .import_verification_key(&legacy_pem, Some(KeyId::new("K0").unwrap()))
        .unwrap();
    plugin.bootstrap().await.unwrap();

    let published = plugin.fetch_keys().unwrap();
    assert!(published.find("K0").unwrap().exclude_from_oidc_discovery);

    for _ in 0..20 {
        let signed = plugin.sign(CLAIMS).unwrap();
        let header = verify_compact(&signed.to_token(CLAIMS), &published).unwrap();
        assert_ne!(header.kid, k0.as_str());
    }
}

/// Misconfiguration: non-positive refresh hint or short lifetime never starts
#[test]
fn test_misconfiguration_rejected() {
    for hint in [0, -1] {
        let err = PluginConfig::builder()
            .refresh_hint_seconds(hint)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    let err = PluginConfig::builder()
        .max_token_expiration_seconds(599)
        .build()
        .unwrap_err();
    assert!(matches!(err, PluginError::InvalidConfiguration(_)));
}

/// Grace-period expiry: a retired key stays at least max lifetime + margin
#[tokio::test]
async fn test_retired_key_expires_after_grace_period() {
    let margin = Duration::from_secs(120);
    let config = PluginConfig::builder()
        .algorithm(SigningAlgorithm::ES256)
        .max_token_expiration_seconds(600)
        .safety_margin(margin)
        .build()
        .unwrap();
    let (plugin, clock) = plugin(config);
    plugin.bootstrap().await.unwrap();
    let k1 = plugin.store().active_signing_key().unwrap().id().clone();

    plugin.scheduler().rotate_now().await.unwrap();

    clock.advance(Duration::from_secs(600));
    plugin.scheduler().tick().await.unwrap();
    assert!(plugin.fetch_keys().unwrap().find(k1.as_str()).is_some());

    clock.advance(margin);
    plugin.scheduler().tick().await.unwrap();
    assert!(plugin.fetch_keys().unwrap().find(k1.as_str()).is_some());

    clock.advance(Duration::from_secs(1));
    let outcome = plugin.scheduler().tick().await.unwrap();
    assert_eq!(outcome.removed, vec![k1.clone()]);
    assert!(plugin.fetch_keys().unwrap().find(k1.as_str()).is_none());
    assert!(matches!(
        plugin.store().key_status(&k1),
        Some(KeyStatus::Removed { .. })
    ));

    // removed is permanent
    clock.advance(Duration::from_secs(86_400));
    plugin.scheduler().tick().await.unwrap();
    assert!(plugin.fetch_keys().unwrap().find(k1.as_str()).is_none());
}

/// Data timestamp moves forward with every published change
#[tokio::test]
async fn test_data_timestamp_advances_on_rotation() {
    let config = PluginConfig::builder()
        .algorithm(SigningAlgorithm::ES256)
        .build()
        .unwrap();
    let (plugin, clock) = plugin(config);
    plugin.bootstrap().await.unwrap();
    let first = plugin.fetch_keys().unwrap().data_timestamp;
    assert_eq!(plugin.fetch_keys().unwrap().data_timestamp, first);

    clock.advance(Duration::from_secs(5));
    plugin.scheduler().rotate_now().await.unwrap();
    assert!(plugin.fetch_keys().unwrap().data_timestamp > first);
}
