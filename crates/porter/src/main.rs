//! Porter CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use porter::cli::Cli;

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // The helper re-exec serves the mount channel on stdin; it never
    // parses arguments.
    if porter::rpc::is_helper() {
        init_tracing(false)?;
        porter::rpc::init_if_helper()?;
        return Ok(());
    }

    // Parse CLI arguments
    let cli = Cli::parse();
    init_tracing(cli.debug)?;

    // Execute command
    cli.execute()
}

fn init_tracing(debug: bool) -> Result<()> {
    let default = if debug { "porter=debug" } else { "porter=info" };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive(default.parse()?))
        .init();

    Ok(())
}
