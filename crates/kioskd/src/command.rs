//! argv templates from the config, expanded and run without a shell.

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Captured result of one command run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// None when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty line of stderr, else of stdout
    pub fn last_line(&self) -> Option<&str> {
        last_non_empty(&self.stderr).or_else(|| last_non_empty(&self.stdout))
    }
}

fn last_non_empty(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Replace every `{key}` in each argument
pub fn expand(argv: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

/// Run `argv` and capture its output
pub async fn run(argv: &[String]) -> Result<CommandOutput> {
    let (program, args) = argv.split_first().context("empty command")?;
    debug!("Running {} {:?}", program, args);

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to start {}", program))?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
