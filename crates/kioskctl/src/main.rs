//! Kiosk Control - check, apply and roll back kiosk updates

use anyhow::Result;
use clap::Parser;
use kiosk_common::config::config_path;
use kioskctl::cli::{Cli, Commands};
use kioskctl::commands::{self, Context};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let ctx = Context::load(cli.config.unwrap_or_else(config_path));

    match cli.command {
        Commands::Check => commands::check(&ctx).await,
        Commands::Apply { yes } => commands::apply(&ctx, yes).await,
        Commands::Rollback { code, yes } => commands::rollback(&ctx, code, yes).await,
        Commands::Versions => commands::versions(&ctx),
        Commands::Status => commands::status(&ctx),
        Commands::Config { defaults } => commands::config(&ctx, defaults),
    }
}
