//! Command line definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kioskctl")]
#[command(about = "Kiosk launcher self-update control", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: $KIOSK_CONFIG, then /etc/kiosk/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the release feed for a newer version
    Check,

    /// Download, verify and install the latest release
    Apply {
        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Reinstall a retained version by its version code
    Rollback {
        code: u32,

        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List retained versions
    Versions,

    /// Installed version, spool and inbox state
    Status,

    /// Print the effective configuration
    Config {
        /// Print built-in defaults instead
        #[arg(long)]
        defaults: bool,
    },
}
