//! Update coordinator
//!
//! Ties path selection, the release feed, download, the version catalog and
//! the installer into the check/apply/rollback workflows. Every public
//! workflow returns a definite value; errors stay inside.

use crate::atomic::now_ms;
use crate::completion::CallbackId;
use crate::config::KioskConfig;
use crate::download::ArtifactDownloader;
use crate::error::{Result, UpdateError};
use crate::github_releases::{ReleaseCheck, ReleaseFetcher, UpdateDescriptor};
use crate::install::{InstallOrchestrator, PackageInstaller, SessionId};
use crate::lock::{UpdateLock, LOCK_FILE};
use crate::network::{ConnectivityProvider, NetworkSelector};
use crate::version::{InstalledVersion, InstalledVersionSource};
use crate::version_store::{StoredVersion, VersionStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Available(UpdateDescriptor),
    UpToDate,
    NoConnectivity,
    Failed(String),
}

impl UpdateOutcome {
    /// Short user-facing line
    pub fn message(&self) -> String {
        match self {
            UpdateOutcome::Available(d) => format!("Version {} available", d.version_label),
            UpdateOutcome::UpToDate => "You're on the latest version".to_string(),
            UpdateOutcome::NoConnectivity => UpdateError::NoConnectivity.to_string(),
            UpdateOutcome::Failed(reason) => reason.clone(),
        }
    }
}

/// Row of the rollback picker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChoice {
    pub version: StoredVersion,
    pub current: bool,
}

/// A committed install, as reported by apply/rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub session: SessionId,
    pub version: StoredVersion,
    pub allow_downgrade: bool,
}

pub struct UpdateCoordinator {
    selector: NetworkSelector,
    fetcher: ReleaseFetcher,
    downloader: ArtifactDownloader,
    store: VersionStore,
    orchestrator: InstallOrchestrator,
    installed: Arc<dyn InstalledVersionSource>,
    retention: usize,
    extension: String,
    lock_path: PathBuf,
}

impl UpdateCoordinator {
    pub fn new(
        config: &KioskConfig,
        connectivity: Arc<dyn ConnectivityProvider>,
        installer: Arc<dyn PackageInstaller>,
        installed: Arc<dyn InstalledVersionSource>,
    ) -> Self {
        let updates_dir = config.storage.updates_dir();
        Self {
            selector: NetworkSelector::new(connectivity),
            fetcher: ReleaseFetcher::new(config.release.clone()),
            downloader: ArtifactDownloader::new(config.release.clone(), &updates_dir),
            store: VersionStore::new(&updates_dir),
            orchestrator: InstallOrchestrator::new(installer, CallbackId::update_complete()),
            installed,
            retention: config.storage.effective_max_stored_versions(),
            extension: config.release.artifact_extension.clone(),
            lock_path: updates_dir.join(LOCK_FILE),
        }
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn installed(&self) -> InstalledVersion {
        self.installed.current()
    }

    /// Ask the release feed whether something newer than the installed
    /// version exists. Never touches the network without a path.
    pub async fn check(&self) -> UpdateOutcome {
        let Some(path) = self.selector.select_internet_path() else {
            return UpdateOutcome::NoConnectivity;
        };

        let installed = self.installed.current();
        match self.fetcher.fetch_latest(&path, &installed).await {
            Ok(ReleaseCheck::Newer(descriptor)) => UpdateOutcome::Available(descriptor),
            Ok(ReleaseCheck::NotNewer { remote_label }) => {
                info!("Up to date ({} installed, {} published)", installed.label, remote_label);
                UpdateOutcome::UpToDate
            }
            Err(UpdateError::NoConnectivity) => UpdateOutcome::NoConnectivity,
            Err(e) => {
                warn!("Update check failed: {}", e);
                UpdateOutcome::Failed(e.to_string())
            }
        }
    }

    /// Download, verify, retain and commit `descriptor`. True once the
    /// installer accepted the session; the install result arrives later.
    pub async fn apply(&self, descriptor: &UpdateDescriptor) -> bool {
        match self.apply_detailed(descriptor).await {
            Ok(_) => true,
            Err(e) => {
                error!("Update to {} failed: {}", descriptor.version_label, e);
                false
            }
        }
    }

    pub async fn apply_detailed(&self, descriptor: &UpdateDescriptor) -> Result<Committed> {
        let path = self
            .selector
            .select_internet_path()
            .ok_or(UpdateError::NoConnectivity)?;
        let _lock = UpdateLock::try_acquire(&self.lock_path)?;

        let staged = self.downloader.fetch_and_verify(&path, descriptor).await?;

        let code = descriptor.target_version_code;
        let file_name = VersionStore::file_name_for(code, &self.extension);
        let retained = self.store.dir().join(&file_name);
        tokio::fs::rename(&staged, &retained).await?;

        let version = StoredVersion {
            code,
            label: descriptor.version_label.clone(),
            file_name,
            installed_at_ms: now_ms(),
        };
        self.store.save(version.clone())?;
        let dropped = self.store.prune(self.retention)?;
        if dropped.iter().any(|v| v.code == code) {
            return Err(UpdateError::Protocol(format!(
                "v{} is older than every retained version",
                code
            )));
        }

        let target = InstalledVersion {
            code,
            label: version.label.clone(),
        };
        let session = self.orchestrator.commit(&retained, false, Some(target)).await?;
        info!("Update to {} (v{}) handed to installer", version.label, code);

        Ok(Committed {
            session,
            version,
            allow_downgrade: false,
        })
    }

    /// Reinstall a retained version. Downgrade is allowed only when it is
    /// older than the installed one.
    pub async fn rollback(&self, code: u32) -> bool {
        match self.rollback_detailed(code).await {
            Ok(_) => true,
            Err(e) => {
                error!("Rollback to v{} failed: {}", code, e);
                false
            }
        }
    }

    pub async fn rollback_detailed(&self, code: u32) -> Result<Committed> {
        let _lock = UpdateLock::try_acquire(&self.lock_path)?;

        let version = self.store.find_by_code(code).ok_or(UpdateError::NotFound(code))?;
        let installed = self.installed.current();
        if installed.code == code {
            return Err(UpdateError::AlreadyInstalled(code));
        }
        let artifact = self
            .store
            .artifact_path(&version)
            .ok_or(UpdateError::NotFound(code))?;

        let allow_downgrade = code < installed.code;
        let target = InstalledVersion {
            code,
            label: version.label.clone(),
        };
        let session = self.orchestrator.commit(&artifact, allow_downgrade, Some(target)).await?;
        info!(
            "Rollback {} -> {} (v{}) handed to installer",
            installed.label, version.label, code
        );

        Ok(Committed {
            session,
            version,
            allow_downgrade,
        })
    }

    /// Retained versions newest first, the running one marked
    pub fn versions(&self) -> Vec<VersionChoice> {
        let current = self.installed.current().code;
        self.store
            .list()
            .into_iter()
            .map(|version| VersionChoice {
                current: version.code == current,
                version,
            })
            .collect()
    }
}
