//! Subcommand implementations

use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use extsign::{KeyId, SigningPlugin};
use extsign_grpc::{ExternalSignerClient, UdsServer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::CheckArgs;
use crate::config::ServerConfig;

/// Run the plugin until a shutdown signal arrives
///
/// Startup order: validate configuration, import verify-only keys, install the
/// first signing key, start rotation, then bind the socket. Nothing is served
/// unless every earlier step succeeded.
///
/// # Errors
///
/// Returns an error if startup fails or the server stops unexpectedly.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let plugin_config = config.validate().context("invalid configuration")?;
    let plugin = SigningPlugin::new(plugin_config)?;

    for key in &config.verification_keys {
        let pem = tokio::fs::read_to_string(&key.path)
            .await
            .with_context(|| format!("failed to read verification key {}", key.path.display()))?;
        let key_id = key.key_id.clone().map(KeyId::new).transpose()?;
        let id = plugin
            .import_verification_key(&pem, key_id)
            .with_context(|| format!("failed to import verification key {}", key.path.display()))?;
        info!(kid = %id, path = %key.path.display(), "Imported verify-only key");
    }

    plugin
        .bootstrap()
        .await
        .context("failed to install the initial signing key")?;

    let shutdown = CancellationToken::new();
    let rotation = plugin.start_rotation(shutdown.child_token());
    let mut server = tokio::spawn(UdsServer::new(plugin, &config.socket_path).serve(shutdown.clone()));

    let outcome = tokio::select! {
        result = &mut server => {
            warn!("Server exited before shutdown was requested");
            result
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            shutdown.cancel();
            (&mut server).await
        }
    };

    rotation.shutdown().await;
    outcome.context("server task panicked")??;
    Ok(())
}

/// Probe a running plugin and validate its responses
///
/// # Errors
///
/// Returns an error if the plugin is unreachable or any response is rejected.
pub async fn check(config: &ServerConfig, args: &CheckArgs) -> Result<()> {
    let mut client = ExternalSignerClient::connect(&config.socket_path)
        .await
        .with_context(|| format!("cannot connect to {}", config.socket_path.display()))?;

    let metadata = client.metadata().await.context("Metadata")?;
    println!(
        "metadata: max_token_expiration_seconds={}",
        metadata.max_token_expiration_seconds
    );

    let published = client.fetch_keys().await.context("FetchKeys")?;
    println!(
        "keys: {} published, refresh_hint_seconds={}, data_timestamp={}",
        published.keys.len(),
        published.refresh_hint_seconds,
        published.data_timestamp
    );
    for key in &published.keys {
        println!(
            "  {} ({} bytes){}",
            key.key_id,
            key.key.len(),
            if key.exclude_from_oidc_discovery { " verify-only" } else { "" }
        );
    }
    if !published.keys.iter().any(|k| !k.exclude_from_oidc_discovery) {
        bail!("no discoverable signing key is published");
    }

    let claims = match &args.claims {
        Some(claims) => claims.clone(),
        None => probe_claims(metadata.max_token_expiration_seconds)?,
    };
    let token = client.sign_and_verify(&claims).await.context("Sign")?;
    let kid = extsign::JwtHeader::decode(token.split('.').next().unwrap_or_default())?.kid;
    println!("sign: ok, kid={kid}");
    Ok(())
}

/// Print the effective configuration
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn print_config(config: &ServerConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn probe_claims(lifetime_seconds: i64) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": "extsign-check",
        "sub": "extsign-check",
        "iat": now,
        "exp": now + lifetime_seconds.min(600),
    });
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
