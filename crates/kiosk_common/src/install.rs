//! Install orchestration against the platform package installer.
//!
//! Flow: create a full-install session, stream the artifact into it, force
//! it to disk, commit with a callback identity. The result arrives later as
//! a `CompletionTicket` in the inbox, never as a return value.

use crate::completion::CallbackId;
use crate::error::{Result, UpdateError};
use crate::version::InstalledVersion;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, warn};

/// Opaque installer session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Only UUIDs are accepted; the id doubles as a directory name.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(u.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters of a full-install session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Permit installing a version older than the installed one
    pub allow_downgrade: bool,
    /// Name the artifact is written under inside the session
    pub artifact_name: String,
    /// Version this session installs, reported back on completion
    #[serde(default)]
    pub target: Option<InstalledVersion>,
}

/// The platform's privileged package installer
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId>;

    /// Stream `len` bytes from `source` into the session under `name`
    async fn write(
        &self,
        session: &SessionId,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        len: u64,
    ) -> Result<u64>;

    /// Force written data to durable storage
    async fn fsync(&self, session: &SessionId) -> Result<()>;

    /// Hand the session to the installer. Exactly one completion ticket
    /// addressed to `callback` is delivered later.
    async fn commit(&self, session: &SessionId, callback: &CallbackId) -> Result<()>;

    async fn abandon(&self, session: &SessionId) -> Result<()>;
}

/// Stages artifacts with the installer and commits them
#[derive(Clone)]
pub struct InstallOrchestrator {
    installer: Arc<dyn PackageInstaller>,
    callback: CallbackId,
}

impl InstallOrchestrator {
    pub fn new(installer: Arc<dyn PackageInstaller>, callback: CallbackId) -> Self {
        Self {
            installer,
            callback,
        }
    }

    pub fn callback(&self) -> &CallbackId {
        &self.callback
    }

    /// Stage `artifact` and commit it. Returns once the installer accepted
    /// the session; install success or failure is delivered asynchronously.
    pub async fn commit(
        &self,
        artifact: &Path,
        allow_downgrade: bool,
        target: Option<InstalledVersion>,
    ) -> Result<SessionId> {
        let mut file = tokio::fs::File::open(artifact).await?;
        let len = file.metadata().await?.len();
        let extension = artifact
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "bin".to_string());

        let params = SessionParams {
            allow_downgrade,
            artifact_name: format!("update.{}", extension),
            target,
        };
        let session = self.installer.create_session(&params).await?;

        let staged = async {
            let written = self
                .installer
                .write(&session, &params.artifact_name, &mut file, len)
                .await?;
            if written != len {
                return Err(UpdateError::Install(format!(
                    "Short write: {} of {} bytes",
                    written, len
                )));
            }
            self.installer.fsync(&session).await?;
            self.installer.commit(&session, &self.callback).await
        }
        .await;

        if let Err(e) = staged {
            warn!("Install session {} failed before commit: {}", session, e);
            if let Err(abandon_err) = self.installer.abandon(&session).await {
                warn!("Abandoning session {} failed: {}", session, abandon_err);
            }
            return Err(e);
        }

        info!(
            "Committed session {} ({} bytes, downgrade {})",
            session,
            len,
            if allow_downgrade { "allowed" } else { "refused" }
        );
        Ok(session)
    }
}
