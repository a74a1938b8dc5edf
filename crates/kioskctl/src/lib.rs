//! kioskctl - Command line control of the kiosk self-update
//!
//! Exposes the CLI definition and commands for integration tests.

pub mod cli;
pub mod commands;
pub mod output;
