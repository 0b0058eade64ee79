//! Concurrency tests
//!
//! Signing and key fetches running while rotations complete must each observe
//! one consistent snapshot: exactly one active key, no duplicate ids, and a
//! signature that verifies against the keys published at that moment or later.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use extsign::verify::verify_compact;
use extsign::{PluginConfig, SigningAlgorithm, SigningPlugin};

const CLAIMS: &str = "eyJzdWIiOiJjb25jdXJyZW50In0";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sign_and_fetch_during_rotation() {
    let config = PluginConfig::builder()
        .algorithm(SigningAlgorithm::ES256)
        .build()
        .unwrap();
    let plugin = SigningPlugin::new(config).unwrap();
    plugin.bootstrap().await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let plugin = plugin.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let mut checked = 0usize;
            while !done.load(Ordering::Acquire) {
                let token = plugin.sign(CLAIMS).expect("sign").to_token(CLAIMS);

                let published = plugin.fetch_keys().expect("fetch");
                assert!(published.refresh_hint_seconds > 0);
                let ids: HashSet<_> = published.keys.iter().map(|k| &k.key_id).collect();
                assert_eq!(ids.len(), published.keys.len(), "duplicate key ids");
                assert!(
                    published
                        .keys
                        .iter()
                        .any(|k| !k.exclude_from_oidc_discovery),
                    "no signing key published"
                );

                // keys are only removed after the grace period, so a key used a
                // moment ago is still published
                verify_compact(&token, &published).expect("token verifies");
                checked += 1;
                tokio::task::yield_now().await;
            }
            checked
        }));
    }

    for _ in 0..10 {
        plugin.scheduler().rotate_now().await.unwrap();
        let snapshot = plugin.store().current_snapshot();
        assert!(snapshot.active().is_some());
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    assert_eq!(plugin.fetch_keys().unwrap().keys.len(), 11);
}

#[test]
fn test_snapshot_reads_from_many_threads() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let config = PluginConfig::builder()
        .algorithm(SigningAlgorithm::ES256)
        .build()
        .unwrap();
    let plugin = SigningPlugin::new(config).unwrap();
    runtime.block_on(plugin.bootstrap()).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let plugin = plugin.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let signed = plugin
                        .sign(CLAIMS)
                        .unwrap_or_else(|e| panic!("thread {i} failed to sign: {e}"));
                    let published = plugin.fetch_keys().unwrap();
                    verify_compact(&signed.to_token(CLAIMS), &published).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
