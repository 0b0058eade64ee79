//! Error types for the gRPC transport
//!
//! Plugin errors map to status codes by class, so callers can tell a bad
//! request from a transient backend failure without parsing messages.

use extsign::{ErrorKind, PluginError};
use thiserror::Error;
use tonic::Status;

/// Result type for gRPC operations
pub type GrpcResult<T> = Result<T, GrpcError>;

/// Error type for gRPC transport operations
#[derive(Debug, Error)]
pub enum GrpcError {
    /// gRPC transport error
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC status returned by the peer
    #[error("gRPC status error: {0}")]
    Status(#[from] Status),

    /// Signing plugin error
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Socket file handling failed
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer response that a conformant caller must reject
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GrpcError {
    /// Create an invalid response error
    #[must_use]
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

impl From<GrpcError> for Status {
    fn from(err: GrpcError) -> Self {
        match err {
            GrpcError::Transport(e) => Status::unavailable(e.to_string()),
            GrpcError::Status(s) => s,
            GrpcError::Plugin(e) => plugin_error_to_status(&e),
            GrpcError::Io(e) => Status::unavailable(e.to_string()),
            GrpcError::InvalidResponse(msg) => Status::internal(msg),
        }
    }
}

/// Convert a plugin error to a gRPC status by error class
#[must_use]
pub fn plugin_error_to_status(err: &PluginError) -> Status {
    let message = err.to_string();
    match err.kind() {
        ErrorKind::Validation => Status::invalid_argument(message),
        ErrorKind::Transient => Status::unavailable(message),
        ErrorKind::Configuration => Status::failed_precondition(message),
        ErrorKind::ContractViolation => Status::internal(message),
    }
}
