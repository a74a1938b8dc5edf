//! Install completion handling for the kiosk host.
//!
//! Success records the new installed version and relaunches the kiosk with
//! fresh task state. A pending confirmation is shown to the user right
//! away. A failure is reported with the installer's message, without retry.

use crate::command;
use crate::listener::CompletionHandler;
use anyhow::{bail, Result};
use async_trait::async_trait;
use kiosk_common::config::HostConfig;
use kiosk_common::version::RecordedInstall;
use kiosk_common::{CompletionStatus, CompletionTicket};
use std::sync::Arc;
use tracing::{info, warn};

/// What the kiosk host can do in response to an install result
#[async_trait]
pub trait HostActions: Send + Sync {
    async fn relaunch_fresh(&self) -> Result<()>;
    async fn present_confirmation(&self, handle: &str) -> Result<()>;
    async fn notify_failure(&self, message: &str) -> Result<()>;
}

/// Host actions as configured argv templates
pub struct CommandHostActions {
    config: HostConfig,
}

impl CommandHostActions {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }

    async fn run(&self, what: &str, template: &[String], vars: &[(&str, &str)]) -> Result<()> {
        if template.is_empty() {
            info!("No {} command configured", what);
            return Ok(());
        }
        let out = command::run(&command::expand(template, vars)).await?;
        if out.code != Some(0) {
            bail!(
                "{} command failed ({}): {}",
                what,
                out.code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
                out.last_line().unwrap_or("")
            );
        }
        Ok(())
    }
}

#[async_trait]
impl HostActions for CommandHostActions {
    async fn relaunch_fresh(&self) -> Result<()> {
        self.run("relaunch", &self.config.relaunch_command, &[]).await
    }

    async fn present_confirmation(&self, handle: &str) -> Result<()> {
        self.run("confirm", &self.config.confirm_command, &[("handle", handle)])
            .await
    }

    async fn notify_failure(&self, message: &str) -> Result<()> {
        self.run("notify", &self.config.notify_command, &[("message", message)])
            .await
    }
}

pub struct InstallCompletionHandler {
    installed: RecordedInstall,
    host: Arc<dyn HostActions>,
}

impl InstallCompletionHandler {
    pub fn new(installed: RecordedInstall, host: Arc<dyn HostActions>) -> Self {
        Self { installed, host }
    }
}

#[async_trait]
impl CompletionHandler for InstallCompletionHandler {
    async fn handle(&self, ticket: &CompletionTicket) -> Result<()> {
        match ticket.status() {
            CompletionStatus::Success => {
                match &ticket.target {
                    Some(target) => {
                        self.installed.record(target)?;
                        info!("Installed {} (v{}), relaunching", target.label, target.code);
                    }
                    None => warn!("Session {} succeeded without a target version", ticket.session_id),
                }
                self.host.relaunch_fresh().await
            }
            CompletionStatus::PendingUserAction {
                confirmation: Some(handle),
            } => {
                info!("Session {} needs confirmation", ticket.session_id);
                self.host.present_confirmation(&handle).await
            }
            CompletionStatus::PendingUserAction { confirmation: None } => {
                warn!("Session {} needs confirmation but carries no handle", ticket.session_id);
                self.host
                    .notify_failure("Update failed: confirmation required on the device")
                    .await
            }
            CompletionStatus::Failure { message } => {
                self.host.notify_failure(&format!("Update failed: {}", message)).await
            }
        }
    }
}
