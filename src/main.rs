//! The metrond telemetry pipeline: a sampling agent and an aggregating
//! server, sharing one metric model and one wire contract.

use clap::Parser;

use crate::{args::{Args, Command}, config::Config, prelude::*};

mod agent;
mod args;
mod config;
mod crypto;
mod grpc;
mod http;
mod logger;
mod model;
mod prelude;
mod server;
mod store;
mod usecase;
mod util;


fn main() {
    if let Err(e) = run() {
        // Log the error in case the logger is already initialized, but also
        // print it to stderr: init failures happen before that point.
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    // `write-config` has no use for a runtime or a fully loaded config.
    if let Command::WriteConfig { target } = &args.cmd {
        return config::write_template(target.as_ref());
    }

    let config = load_config(&args)?;
    logger::init(&config.log, args.cmd.name())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    match &args.cmd {
        Command::Serve { .. } => runtime.block_on(server::run(config)),
        Command::Agent { .. } => runtime.block_on(agent::run(config)),
        Command::WriteConfig { .. } => unreachable!("handled above"),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let shared = match &args.cmd {
        Command::Serve { shared } | Command::Agent { shared } => shared,
        Command::WriteConfig { .. } => unreachable!("handled above"),
    };

    match &shared.config {
        Some(path) => Config::load_from(path),
        None => Config::from_env_or_default_locations(),
    }
}
