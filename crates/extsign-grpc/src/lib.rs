//! extsign gRPC transport
//!
//! Serves a [`SigningPlugin`](extsign::SigningPlugin) as the
//! `externaljwt.v1alpha1.ExternalJWTSigner` service over a Unix domain socket,
//! built on [tonic](https://github.com/hyperium/tonic).
//!
//! # Features
//!
//! - **Server**: [`ExternalSignerService`] adapts the plugin to the generated
//!   service trait; [`UdsServer`] owns the socket file and graceful shutdown
//! - **Client**: [`ExternalSignerClient`] talks to a plugin the way the control
//!   plane does and rejects responses a conformant caller would reject
//!
//! # Quick Start
//!
//! ```no_run
//! use extsign::{PluginConfig, SigningPlugin};
//! use extsign_grpc::{ExternalSignerClient, UdsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let plugin = SigningPlugin::new(PluginConfig::default())?;
//! plugin.bootstrap().await?;
//!
//! let shutdown = CancellationToken::new();
//! let server = UdsServer::new(plugin, "/run/extsign/signer.sock");
//! tokio::spawn(server.serve(shutdown.clone()));
//!
//! let mut client = ExternalSignerClient::connect("/run/extsign/signer.sock").await?;
//! let metadata = client.metadata().await?;
//! assert!(metadata.max_token_expiration_seconds >= 600);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Generated protobuf types for `externaljwt.v1alpha1`
pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::all)]
    #![allow(clippy::pedantic)]
    tonic::include_proto!("externaljwt.v1alpha1");
}

pub mod client;
pub mod convert;
pub mod error;
pub mod server;

pub use client::ExternalSignerClient;
pub use error::{GrpcError, GrpcResult};
pub use server::{ExternalSignerService, UdsServer};
