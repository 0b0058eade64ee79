//! Property tests for signed headers

use std::sync::{Arc, OnceLock};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use extsign::verify::{check_header, verify_compact};
use extsign::{
    JwtHeader, ManualClock, MAX_KEY_ID_LENGTH, PluginConfig, SigningAlgorithm, SigningPlugin,
    SoftwareKeyGenerator,
};
use proptest::prelude::*;

fn plugin() -> &'static SigningPlugin {
    static PLUGIN: OnceLock<SigningPlugin> = OnceLock::new();
    PLUGIN.get_or_init(|| {
        let config = PluginConfig::builder()
            .algorithm(SigningAlgorithm::ES256)
            .build()
            .unwrap();
        let plugin = SigningPlugin::with_parts(
            config,
            Arc::new(ManualClock::default()),
            Arc::new(SoftwareKeyGenerator::new()),
        )
        .unwrap();
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(plugin.bootstrap())
            .unwrap();
        plugin
    })
}

proptest! {
    #[test]
    fn prop_header_shape_holds_for_any_claims(claims in proptest::collection::vec(any::<u8>(), 1..512)) {
        let claims = URL_SAFE_NO_PAD.encode(&claims);
        let signed = plugin().sign(&claims).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&signed.header).unwrap()).unwrap();
        let fields: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        prop_assert_eq!(fields.len(), 3);
        prop_assert_eq!(&json["typ"], "JWT");

        let header = JwtHeader::decode(&signed.header).unwrap();
        prop_assert!(check_header(&header).is_ok());
        prop_assert!(!header.kid.is_empty() && header.kid.len() <= MAX_KEY_ID_LENGTH);
        prop_assert!(SigningAlgorithm::ALL.contains(&header.alg));

        let published = plugin().fetch_keys().unwrap();
        prop_assert!(verify_compact(&signed.to_token(&claims), &published).is_ok());
    }

    #[test]
    fn prop_non_base64url_claims_rejected(claims in "[A-Za-z0-9_-]{0,16}[+/=. ][A-Za-z0-9_-]{0,16}") {
        prop_assert!(plugin().sign(&claims).is_err());
    }
}
