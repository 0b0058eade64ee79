//! Configuration loading and `check` subcommand tests

use std::io::Write;
use std::time::Duration;

use extsign::{PluginConfig, SigningAlgorithm, SigningPlugin};
use extsign_grpc::UdsServer;
use extsign_server::cli::CheckArgs;
use extsign_server::commands;
use extsign_server::config::{ConfigError, ServerConfig, VerificationKeyConfig, env_source};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_toml_file_overrides_defaults() {
    let file = write_config(
        ".toml",
        r#"
socket_path = "/tmp/extsign-test.sock"

[plugin]
max_token_expiration_seconds = 7200
refresh_hint_seconds = 60
algorithm = "ES256"

[rotation]
rotation_interval_seconds = 3600
safety_margin_seconds = 30

[[verification_keys]]
path = "/etc/extsign/legacy.pem"
key_id = "legacy"

[logging]
json = true
"#,
    );

    let config = ServerConfig::load_with_prefix(Some(file.path()), "EXTSIGN_TEST_TOML").unwrap();
    assert_eq!(config.socket_path.to_str(), Some("/tmp/extsign-test.sock"));
    assert_eq!(config.plugin.max_token_expiration_seconds, 7200);
    assert_eq!(config.plugin.algorithm, SigningAlgorithm::ES256);
    // untouched fields keep their defaults
    assert_eq!(config.rotation.check_interval_seconds, 60);
    assert_eq!(config.logging.level, "info");
    assert_eq!(
        config.verification_keys,
        vec![VerificationKeyConfig {
            path: "/etc/extsign/legacy.pem".into(),
            key_id: Some("legacy".into()),
        }]
    );

    let plugin = config.validate().unwrap();
    assert_eq!(plugin.refresh_hint().as_secs(), 60);
    assert_eq!(
        plugin.rotation().grace_period(),
        Duration::from_secs(7200 + 30)
    );
}

fn env(vars: &[(&str, &str)]) -> config::Environment {
    let vars = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect::<config::Map<String, String>>();
    env_source("EXTSIGN").source(Some(vars))
}

#[test]
fn test_environment_overrides_file_and_defaults() {
    let file = write_config(
        ".toml",
        "[plugin]\nrefresh_hint_seconds = 60\nmax_token_expiration_seconds = 7200\n",
    );
    let config = ServerConfig::load_with_env(
        Some(file.path()),
        env(&[
            ("EXTSIGN_PLUGIN__REFRESH_HINT_SECONDS", "61"),
            ("EXTSIGN_ROTATION__CHECK_INTERVAL_SECONDS", "15"),
            ("EXTSIGN_SOCKET_PATH", "/tmp/extsign-env.sock"),
            ("EXTSIGN_LOGGING__JSON", "true"),
        ]),
    )
    .unwrap();

    assert_eq!(config.plugin.refresh_hint_seconds, 61);
    assert_eq!(config.plugin.max_token_expiration_seconds, 7200);
    assert_eq!(config.rotation.check_interval_seconds, 15);
    assert_eq!(config.socket_path.to_str(), Some("/tmp/extsign-env.sock"));
    assert!(config.logging.json);
    assert_eq!(config.validate().unwrap().refresh_hint().as_secs(), 61);
}

#[test]
fn test_environment_needs_single_underscore_after_prefix() {
    let config = ServerConfig::load_with_env(
        None,
        env(&[
            ("EXTSIGN__PLUGIN__REFRESH_HINT_SECONDS", "61"),
            ("OTHER_PLUGIN__REFRESH_HINT_SECONDS", "62"),
        ]),
    )
    .unwrap();
    assert_eq!(config.plugin.refresh_hint_seconds, 300);
}

#[test]
fn test_yaml_file_with_invalid_refresh_hint() {
    let file = write_config(
        ".yaml",
        "plugin:\n  refresh_hint_seconds: 0\n",
    );
    let config = ServerConfig::load_with_prefix(Some(file.path()), "EXTSIGN_TEST_YAML").unwrap();
    assert!(matches!(
        config.validate().unwrap_err(),
        ConfigError::Invalid(_)
    ));
}

#[test]
fn test_unknown_algorithm_fails_to_parse() {
    let file = write_config(".json", r#"{"plugin": {"algorithm": "HS256"}}"#);
    assert!(matches!(
        ServerConfig::load_with_prefix(Some(file.path()), "EXTSIGN_TEST_JSON").unwrap_err(),
        ConfigError::ParseError(_)
    ));
}

#[test]
fn test_unsupported_extension() {
    let file = write_config(".ini", "socket_path = /tmp/x");
    assert!(matches!(
        ServerConfig::load_with_prefix(Some(file.path()), "EXTSIGN_TEST_INI").unwrap_err(),
        ConfigError::UnsupportedFormat
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_against_running_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("signer.sock");

    let plugin = SigningPlugin::new(
        PluginConfig::builder()
            .algorithm(SigningAlgorithm::ES256)
            .build()
            .unwrap(),
    )
    .unwrap();
    plugin.bootstrap().await.unwrap();

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(UdsServer::new(plugin, &socket).serve(shutdown.clone()));
    tokio::time::timeout(Duration::from_secs(5), async {
        while !socket.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let config = ServerConfig {
        socket_path: socket.clone(),
        ..ServerConfig::default()
    };
    commands::check(&config, &CheckArgs { claims: None })
        .await
        .unwrap();

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_check_fails_without_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        socket_path: dir.path().join("missing.sock"),
        ..ServerConfig::default()
    };
    assert!(
        commands::check(&config, &CheckArgs { claims: None })
            .await
            .is_err()
    );
}
