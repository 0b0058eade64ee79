//! gRPC server for the signing plugin
//!
//! [`ExternalSignerService`] implements the generated `ExternalJwtSigner` trait
//! on top of a [`SigningPlugin`]. [`UdsServer`] binds it to a Unix domain
//! socket, owning the socket file from bind until shutdown.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use extsign::SigningPlugin;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument};

use crate::error::{GrpcResult, plugin_error_to_status};
use crate::proto::{
    self,
    external_jwt_signer_server::{ExternalJwtSigner, ExternalJwtSignerServer},
};

/// Default permissions of the socket file (owner read/write only)
pub const DEFAULT_SOCKET_PERMISSIONS: u32 = 0o600;

/// gRPC adapter around a [`SigningPlugin`]
#[derive(Debug, Clone)]
pub struct ExternalSignerService {
    plugin: SigningPlugin,
}

impl ExternalSignerService {
    /// Wrap a plugin
    #[must_use]
    pub fn new(plugin: SigningPlugin) -> Self {
        Self { plugin }
    }

    /// Get the tonic service for this adapter
    #[must_use]
    pub fn into_service(self) -> ExternalJwtSignerServer<Self> {
        ExternalJwtSignerServer::new(self)
    }
}

#[tonic::async_trait]
impl ExternalJwtSigner for ExternalSignerService {
    #[instrument(skip(self, request), fields(method = "Sign"))]
    async fn sign(
        &self,
        request: Request<proto::SignJwtRequest>,
    ) -> Result<Response<proto::SignJwtResponse>, Status> {
        let claims = request.into_inner().claims;
        let signed = self.plugin.sign(&claims).map_err(|e| {
            debug!(error = %e, "Sign rejected");
            plugin_error_to_status(&e)
        })?;
        Ok(Response::new(signed.into()))
    }

    #[instrument(skip(self, _request), fields(method = "FetchKeys"))]
    async fn fetch_keys(
        &self,
        _request: Request<proto::FetchKeysRequest>,
    ) -> Result<Response<proto::FetchKeysResponse>, Status> {
        let published = self
            .plugin
            .fetch_keys()
            .map_err(|e| plugin_error_to_status(&e))?;
        Ok(Response::new(published.into()))
    }

    #[instrument(skip(self, _request), fields(method = "Metadata"))]
    async fn metadata(
        &self,
        _request: Request<proto::MetadataRequest>,
    ) -> Result<Response<proto::MetadataResponse>, Status> {
        Ok(Response::new(self.plugin.metadata().into()))
    }
}

/// Serves an [`ExternalSignerService`] on a Unix domain socket
#[derive(Debug)]
pub struct UdsServer {
    service: ExternalSignerService,
    socket_path: PathBuf,
    permissions: u32,
}

impl UdsServer {
    /// Create a server for `plugin` listening on `socket_path`
    #[must_use]
    pub fn new(plugin: SigningPlugin, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            service: ExternalSignerService::new(plugin),
            socket_path: socket_path.into(),
            permissions: DEFAULT_SOCKET_PERMISSIONS,
        }
    }

    /// Set socket file permissions
    #[must_use]
    pub const fn permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Path of the socket file
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and serve until `shutdown` fires
    ///
    /// A stale socket file left by a previous run is removed before binding, and
    /// the socket file is removed again once the server has drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or the server fails.
    pub async fn serve(self, shutdown: CancellationToken) -> GrpcResult<()> {
        let listener = bind(&self.socket_path, self.permissions).await?;
        info!(socket = %self.socket_path.display(), "External JWT signer listening");

        let result = tonic::transport::Server::builder()
            .add_service(self.service.into_service())
            .serve_with_incoming_shutdown(
                UnixListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await;

        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            debug!(error = %e, "Failed to remove socket file");
        }

        match result {
            Ok(()) => {
                info!("External JWT signer stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "External JWT signer failed");
                Err(e.into())
            }
        }
    }
}

async fn bind(socket_path: &Path, permissions: u32) -> GrpcResult<UnixListener> {
    if tokio::fs::try_exists(socket_path).await? {
        debug!(socket = %socket_path.display(), "Removing stale socket file");
        tokio::fs::remove_file(socket_path).await?;
    }
    let parent = match socket_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(parent).await?;

    let file_name = socket_path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("socket path {} has no file name", socket_path.display()),
        )
    })?;

    // The socket only becomes reachable at its final path after its mode is
    // set; until then it lives in a directory nobody else can enter.
    let staging = parent.join(format!(
        ".{}.{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));
    if tokio::fs::try_exists(&staging).await? {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    tokio::fs::DirBuilder::new()
        .mode(0o700)
        .create(&staging)
        .await?;

    let staged = staging.join(file_name);
    let bound = async {
        let listener = UnixListener::bind(&staged)?;
        tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(permissions))
            .await?;
        tokio::fs::rename(&staged, socket_path).await?;
        Ok::<_, std::io::Error>(listener)
    }
    .await;

    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        debug!(error = %e, "Failed to remove socket staging directory");
    }
    Ok(bound?)
}
