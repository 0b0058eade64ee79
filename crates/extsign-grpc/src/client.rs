//! gRPC client for an external JWT signer
//!
//! Connects over a Unix domain socket and validates every response the way the
//! control plane does, so a misbehaving plugin is caught at the call site.

use std::path::{Path, PathBuf};
use std::time::Duration;

use extsign::{Metadata, PublishedKeys, SignedHeader};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info, instrument};

use crate::error::{GrpcError, GrpcResult};
use crate::proto::{self, external_jwt_signer_client::ExternalJwtSignerClient};

/// Configuration for the client
#[derive(Debug, Clone)]
pub struct ExternalSignerClientConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
}

impl Default for ExternalSignerClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Conformant client for the `ExternalJWTSigner` service
#[derive(Debug, Clone)]
pub struct ExternalSignerClient {
    client: ExternalJwtSignerClient<Channel>,
    socket_path: PathBuf,
}

impl ExternalSignerClient {
    /// Connect to a plugin socket with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(socket_path: impl AsRef<Path>) -> GrpcResult<Self> {
        Self::connect_with_config(socket_path, ExternalSignerClientConfig::default()).await
    }

    /// Connect to a plugin socket with custom configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect_with_config(
        socket_path: impl AsRef<Path>,
        config: ExternalSignerClientConfig,
    ) -> GrpcResult<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let connector_path = socket_path.clone();

        // the URI is required by tonic but ignored by the connector
        let channel = Endpoint::from_static("http://[::]:50051")
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = connector_path.clone();
                async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
            }))
            .await?;

        info!(socket = %socket_path.display(), "Connected to external JWT signer");

        Ok(Self {
            client: ExternalJwtSignerClient::new(channel),
            socket_path,
        })
    }

    /// Socket this client is connected to
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sign a claims segment
    ///
    /// # Errors
    ///
    /// Returns [`GrpcError::Status`] if the plugin rejects the request and
    /// [`GrpcError::InvalidResponse`] if the header is not exactly
    /// `{alg, kid, typ: "JWT"}`.
    #[instrument(skip(self, claims), fields(method = "Sign"))]
    pub async fn sign(&mut self, claims: &str) -> GrpcResult<SignedHeader> {
        let response = self
            .client
            .sign(proto::SignJwtRequest {
                claims: claims.to_string(),
            })
            .await?;
        let signed = SignedHeader::try_from(response.into_inner())?;
        debug!("Received signed header");
        Ok(signed)
    }

    /// Fetch the current verification keys
    ///
    /// # Errors
    ///
    /// Returns [`GrpcError::InvalidResponse`] for a non-positive refresh hint,
    /// duplicate or oversized key ids, or a missing timestamp.
    #[instrument(skip(self), fields(method = "FetchKeys"))]
    pub async fn fetch_keys(&mut self) -> GrpcResult<PublishedKeys> {
        let response = self.client.fetch_keys(proto::FetchKeysRequest {}).await?;
        let published = PublishedKeys::try_from(response.into_inner())?;
        debug!(keys = published.keys.len(), "Received verification keys");
        Ok(published)
    }

    /// Fetch the token lifetime policy
    ///
    /// # Errors
    ///
    /// Returns [`GrpcError::InvalidResponse`] if the lifetime is under 600 seconds.
    #[instrument(skip(self), fields(method = "Metadata"))]
    pub async fn metadata(&mut self) -> GrpcResult<Metadata> {
        let response = self.client.metadata(proto::MetadataRequest {}).await?;
        Metadata::try_from(response.into_inner())
    }

    /// Sign `claims` and verify the result against a fresh key fetch
    ///
    /// # Errors
    ///
    /// Returns [`GrpcError::Plugin`] if the assembled token does not verify.
    pub async fn sign_and_verify(&mut self, claims: &str) -> GrpcResult<String> {
        let token = self.sign(claims).await?.to_token(claims);
        let published = self.fetch_keys().await?;
        extsign::verify::verify_compact(&token, &published).map_err(GrpcError::from)?;
        Ok(token)
    }
}
