//! Command implementations

use crate::output::{self, EXIT_FAILURE, EXIT_NO_CONNECTIVITY};
use anyhow::{Context as _, Result};
use kiosk_common::completion::Inbox;
use kiosk_common::network::{NetworkSelector, SysfsConnectivity};
use kiosk_common::spool::{SessionState, Spool, SpoolInstaller};
use kiosk_common::version::RecordedInstall;
use kiosk_common::{KioskConfig, UpdateCoordinator, UpdateOutcome};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded configuration plus where it came from
pub struct Context {
    pub config: KioskConfig,
    pub config_path: PathBuf,
}

impl Context {
    pub fn load(path: PathBuf) -> Self {
        debug!("Loading config from {}", path.display());
        Self {
            config: KioskConfig::load_from(&path),
            config_path: path,
        }
    }

    pub fn coordinator(&self) -> UpdateCoordinator {
        let storage = &self.config.storage;
        UpdateCoordinator::new(
            &self.config,
            Arc::new(SysfsConnectivity::new()),
            Arc::new(SpoolInstaller::new(Spool::new(storage.sessions_dir()))),
            Arc::new(RecordedInstall::new(storage.installed_path(), &self.config.app)),
        )
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub async fn check(ctx: &Context) -> Result<ExitCode> {
    let coordinator = ctx.coordinator();
    let installed = coordinator.installed();
    output::info(&format!("Installed: {} (v{})", installed.label, installed.code));

    info!("Querying {}", ctx.config.release.latest_release_url());
    let outcome = coordinator.check().await;
    debug!("Check outcome: {:?}", outcome);
    match &outcome {
        UpdateOutcome::Available(d) => {
            output::ok(&outcome.message());
            println!("  Artifact: {}", d.artifact_url);
            println!(
                "  Checksum: {}",
                d.checksum_manifest_url.as_deref().unwrap_or("not published")
            );
            println!();
            println!("Run 'kioskctl apply' to install it.");
            Ok(ExitCode::SUCCESS)
        }
        UpdateOutcome::UpToDate => {
            output::ok(&outcome.message());
            Ok(ExitCode::SUCCESS)
        }
        UpdateOutcome::NoConnectivity => {
            output::error(&outcome.message());
            eprintln!("  Please connect to WiFi first");
            Ok(ExitCode::from(EXIT_NO_CONNECTIVITY))
        }
        UpdateOutcome::Failed(reason) => {
            output::error(reason);
            Ok(ExitCode::from(EXIT_FAILURE))
        }
    }
}

pub async fn apply(ctx: &Context, yes: bool) -> Result<ExitCode> {
    let coordinator = ctx.coordinator();
    let installed = coordinator.installed();

    info!("Querying {}", ctx.config.release.latest_release_url());
    let descriptor = match coordinator.check().await {
        UpdateOutcome::Available(d) => d,
        UpdateOutcome::UpToDate => {
            output::ok("You're on the latest version");
            return Ok(ExitCode::SUCCESS);
        }
        UpdateOutcome::NoConnectivity => {
            return Ok(output::update_error(&kiosk_common::UpdateError::NoConnectivity));
        }
        UpdateOutcome::Failed(reason) => {
            output::error(&reason);
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    };

    println!(
        "Update available: {} -> {}",
        installed.label,
        descriptor.version_label.bold()
    );
    if !yes && !confirm("Install now?")? {
        println!("Update cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    output::info(&format!("Downloading {} ...", descriptor.version_label));
    debug!("Target version code {}", descriptor.target_version_code);
    match coordinator.apply_detailed(&descriptor).await {
        Ok(committed) => {
            output::ok(&format!(
                "{} (v{}) handed to the installer",
                committed.version.label, committed.version.code
            ));
            println!("  Session: {}", committed.session);
            println!("  The kiosk relaunches once the install completes.");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(output::update_error(&e)),
    }
}

pub async fn rollback(ctx: &Context, code: u32, yes: bool) -> Result<ExitCode> {
    let coordinator = ctx.coordinator();
    let installed = coordinator.installed();

    let Some(target) = coordinator.store().find_by_code(code) else {
        return Ok(output::update_error(&kiosk_common::UpdateError::NotFound(code)));
    };
    if target.code == installed.code {
        output::warning("Already running this version");
        return Ok(ExitCode::SUCCESS);
    }

    if !yes
        && !confirm(&format!(
            "Roll back from {} to {} (v{})?",
            installed.label, target.label, target.code
        ))?
    {
        println!("Rollback cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    info!("Rolling back from v{} to v{}", installed.code, code);
    match coordinator.rollback_detailed(code).await {
        Ok(committed) => {
            output::ok(&format!(
                "Rollback to {} (v{}) handed to the installer",
                committed.version.label, committed.version.code
            ));
            if committed.allow_downgrade {
                println!("  Downgrade allowed for this install.");
            }
            println!("  Session: {}", committed.session);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(output::update_error(&e)),
    }
}

pub fn versions(ctx: &Context) -> Result<ExitCode> {
    let coordinator = ctx.coordinator();
    let choices = coordinator.versions();

    if choices.is_empty() {
        output::info("No previous versions available");
        return Ok(ExitCode::SUCCESS);
    }

    output::section("VERSIONS");
    for choice in &choices {
        let v = &choice.version;
        let line = format!(
            "  v{:<5} {:<12} {}",
            v.code,
            v.label,
            v.format_date()
        );
        if choice.current {
            println!("{} {}", line.bold(), "(current)".green());
        } else {
            println!("{}", line);
        }
    }
    println!();
    Ok(ExitCode::SUCCESS)
}

pub fn status(ctx: &Context) -> Result<ExitCode> {
    let config = &ctx.config;
    let coordinator = ctx.coordinator();
    let installed = coordinator.installed();

    output::section("KIOSK");
    println!("  Installed:  {} (v{})", installed.label, installed.code);
    println!("  Config:     {}", ctx.config_path.display());
    println!("  Data:       {}", config.storage.data_dir.display());
    println!("  Feed:       {}", config.release.latest_release_url());

    output::section("NETWORK");
    match NetworkSelector::new(Arc::new(SysfsConnectivity::new())).select_internet_path() {
        Some(path) => println!(
            "  Update path: {} ({})",
            path.interface,
            path.kind.as_str()
        ),
        None => println!("  Update path: {}", "none".yellow()),
    }

    output::section("STORAGE");
    let stored = coordinator.store().list();
    println!(
        "  Retained:   {} of {}",
        stored.len(),
        config.storage.effective_max_stored_versions()
    );
    if let Some(newest) = stored.first() {
        println!("  Newest:     {} (v{})", newest.label, newest.code);
    }

    output::section("INSTALLS");
    let sessions = Spool::new(config.storage.sessions_dir()).list();
    for state in [SessionState::Open, SessionState::Committed, SessionState::Installing] {
        let count = sessions.iter().filter(|s| s.state == state).count();
        println!("  {:<11} {}", format!("{}:", state.as_str()), count);
    }
    let pending = Inbox::new(config.storage.inbox_dir()).pending_count();
    println!("  {:<11} {}", "tickets:", pending);
    println!();

    Ok(ExitCode::SUCCESS)
}

pub fn config(ctx: &Context, defaults: bool) -> Result<ExitCode> {
    let shown = if defaults {
        KioskConfig::default()
    } else {
        ctx.config.clone()
    };
    if !defaults && !ctx.config_path.exists() {
        println!("# {} not found, showing defaults", ctx.config_path.display());
    }
    let text = toml::to_string_pretty(&shown).context("Failed to serialize config")?;
    print!("{}", text);
    Ok(ExitCode::SUCCESS)
}
