//! This module defines the command line arguments metrond accepts.

use std::path::PathBuf;


#[derive(Debug, clap::Parser)]
#[clap(about = "Telemetry pipeline: a sampling agent and an aggregating server.")]
pub(crate) struct Args {
    #[clap(subcommand)]
    pub(crate) cmd: Command,
}

#[derive(Debug, clap::Parser)]
pub(crate) enum Command {
    /// Starts the metric server: HTTP (and optionally gRPC) listener,
    /// snapshot writer, restore on start.
    Serve {
        #[clap(flatten)]
        shared: Shared,
    },

    /// Starts the metric agent: samples host and process metrics
    /// periodically and ships them to the configured server.
    Agent {
        #[clap(flatten)]
        shared: Shared,
    },

    /// Outputs a template for the configuration file (which includes
    /// descriptions of all options).
    WriteConfig {
        /// Target file. If not specified, the template is written to stdout.
        target: Option<PathBuf>,
    },
}

impl Command {
    /// Subcommand name as used in log file names.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Serve { .. } => "serve",
            Self::Agent { .. } => "agent",
            Self::WriteConfig { .. } => "other",
        }
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Shared {
    /// Path to the configuration file. If this is not specified, metrond will
    /// try opening the path inside `METROND_CONFIG_PATH`, `config.toml`,
    /// `config.json5` or `/etc/metrond/config.toml`.
    #[clap(short, long)]
    pub(crate) config: Option<PathBuf>,
}
