//! # extsign-server
//!
//! Process wrapper around the [`extsign`] signing core: layered configuration,
//! tracing setup, key bootstrap and rotation, and the `externaljwt.v1alpha1`
//! gRPC endpoint on a Unix domain socket.

#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod telemetry;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use config::ServerConfig;

/// Parse arguments, load configuration and run the selected subcommand
///
/// # Errors
///
/// Returns an error if configuration loading, telemetry setup, or the
/// subcommand fails.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);

    match cli.subcommand() {
        Command::PrintConfig => commands::print_config(&config),
        Command::Check(args) => {
            telemetry::init(&config.logging)?;
            commands::check(&config, &args).await
        }
        Command::Serve => {
            telemetry::init(&config.logging)?;
            commands::serve(config).await
        }
    }
}
