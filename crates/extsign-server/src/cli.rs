//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ServerConfig;

/// External JWT signing plugin
#[derive(Parser, Debug)]
#[command(
    name = "extsign-server",
    version,
    about = "External JWT signing plugin serving externaljwt.v1alpha1 on a Unix socket"
)]
pub struct Cli {
    /// Subcommand to run; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file (.toml, .yaml, .yml or .json)
    #[arg(long, short = 'c', global = true, env = "EXTSIGN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the plugin until SIGINT or SIGTERM
    Serve,
    /// Probe a running plugin the way the control plane does
    Check(CheckArgs),
    /// Print the effective configuration as JSON
    PrintConfig,
}

/// Options for `check`
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CheckArgs {
    /// Claims segment to sign; a short-lived probe token by default
    #[arg(long)]
    pub claims: Option<String>,
}

/// Settings that take precedence over file and environment
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Unix socket path
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `extsign=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json_logs: bool,
}

impl Overrides {
    /// Apply overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(socket) = &self.socket {
            config.socket_path.clone_from(socket);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

impl Cli {
    /// The subcommand, defaulting to `serve`
    #[must_use]
    pub fn subcommand(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
