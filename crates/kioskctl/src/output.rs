//! Terminal output - ASCII tags, color only as emphasis

use kiosk_common::UpdateError;
use owo_colors::OwoColorize;
use std::process::ExitCode;
use tracing::debug;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NO_CONNECTIVITY: u8 = 2;
pub const EXIT_BUSY: u8 = 3;

pub fn ok(message: &str) {
    println!("[OK] {}", message.green());
}

pub fn info(message: &str) {
    println!("[INFO] {}", message);
}

pub fn warning(message: &str) {
    println!("[WARNING] {}", message.yellow());
}

pub fn error(message: &str) {
    eprintln!("[ERROR] {}", message.red());
}

pub fn section(title: &str) {
    println!();
    println!("[{}]", title.bold());
}

/// Report `e` and pick the exit code for it
pub fn update_error(e: &UpdateError) -> ExitCode {
    debug!(kind = e.kind(), retryable = e.is_retryable(), "Operation failed");
    error(&e.to_string());
    match e {
        UpdateError::NoConnectivity => {
            eprintln!("  Please connect to WiFi first");
            ExitCode::from(EXIT_NO_CONNECTIVITY)
        }
        UpdateError::Busy => {
            eprintln!("  Try again once it finishes");
            ExitCode::from(EXIT_BUSY)
        }
        _ if e.is_retryable() => {
            eprintln!("  ({}) Running the command again may succeed", e.kind());
            ExitCode::from(EXIT_FAILURE)
        }
        _ => ExitCode::from(EXIT_FAILURE),
    }
}
