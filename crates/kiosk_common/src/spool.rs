//! Durable install spool
//!
//! Each session is a directory `sessions/<id>/` with `session.json` and the
//! artifact written into it. `commit` only flips the recorded state; the
//! daemon's spool runner performs the install and delivers the ticket, so
//! the committing process may exit right away.

use crate::atomic::{atomic_write_json, now_ms};
use crate::completion::CallbackId;
use crate::error::{Result, UpdateError};
use crate::install::{PackageInstaller, SessionId, SessionParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

const RECORD_FILE: &str = "session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, artifact being written
    Open,
    /// Handed to the installer, waiting to run
    Committed,
    /// Installer picked it up
    Installing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Committed => "committed",
            SessionState::Installing => "installing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub params: SessionParams,
    pub state: SessionState,
    #[serde(default)]
    pub callback: Option<CallbackId>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Session directory layout and record persistence
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    pub fn artifact_path(&self, record: &SessionRecord) -> PathBuf {
        self.session_dir(&record.id).join(&record.params.artifact_name)
    }

    pub fn load(&self, id: &SessionId) -> io::Result<SessionRecord> {
        let content = fs::read_to_string(self.session_dir(id).join(RECORD_FILE))?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn store(&self, record: &SessionRecord) -> io::Result<()> {
        atomic_write_json(&self.session_dir(&record.id).join(RECORD_FILE), record)
    }

    /// Transition `record` to `state` and persist it
    pub fn transition(&self, record: &mut SessionRecord, state: SessionState) -> io::Result<()> {
        debug!("Session {}: {} -> {}", record.id, record.state.as_str(), state.as_str());
        record.state = state;
        record.updated_at_ms = now_ms();
        self.store(record)
    }

    /// All readable sessions, oldest first
    pub fn list(&self) -> Vec<SessionRecord> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut records: Vec<SessionRecord> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| SessionId::parse(&e.file_name().to_string_lossy()))
            .filter_map(|id| match self.load(&id) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Skipping unreadable session {}: {}", id, e);
                    None
                }
            })
            .collect();
        records.sort_by_key(|r| r.created_at_ms);
        records
    }

    pub fn remove(&self, id: &SessionId) -> io::Result<()> {
        match fs::remove_dir_all(self.session_dir(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn load_in_state(&self, id: &SessionId, expected: SessionState) -> Result<SessionRecord> {
        let record = self
            .load(id)
            .map_err(|e| UpdateError::Install(format!("Unknown session {}: {}", id, e)))?;
        if record.state != expected {
            return Err(UpdateError::Install(format!(
                "Session {} is {}, expected {}",
                id,
                record.state.as_str(),
                expected.as_str()
            )));
        }
        Ok(record)
    }
}

/// `PackageInstaller` backed by the on-disk spool
#[derive(Debug, Clone)]
pub struct SpoolInstaller {
    spool: Spool,
}

impl SpoolInstaller {
    pub fn new(spool: Spool) -> Self {
        Self { spool }
    }

    pub fn spool(&self) -> &Spool {
        &self.spool
    }
}

#[async_trait]
impl PackageInstaller for SpoolInstaller {
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId> {
        let name = Path::new(&params.artifact_name);
        if name.file_name().map(|b| b != name.as_os_str()).unwrap_or(true) {
            return Err(UpdateError::Install(format!(
                "Invalid artifact name {}",
                params.artifact_name
            )));
        }

        let now = now_ms();
        let record = SessionRecord {
            id: SessionId::new(),
            params: params.clone(),
            state: SessionState::Open,
            callback: None,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.spool.store(&record)?;
        debug!("Created session {}", record.id);
        Ok(record.id)
    }

    async fn write(
        &self,
        session: &SessionId,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        len: u64,
    ) -> Result<u64> {
        let record = self.spool.load_in_state(session, SessionState::Open)?;
        if name != record.params.artifact_name {
            return Err(UpdateError::Install(format!(
                "Session {} expects {}, got {}",
                session, record.params.artifact_name, name
            )));
        }

        let mut out = tokio::fs::File::create(self.spool.artifact_path(&record)).await?;
        let written = tokio::io::copy(source, &mut out).await?;
        out.flush().await?;
        if written != len {
            warn!("Session {}: wrote {} bytes, announced {}", session, written, len);
        }
        Ok(written)
    }

    async fn fsync(&self, session: &SessionId) -> Result<()> {
        let record = self.spool.load_in_state(session, SessionState::Open)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(self.spool.artifact_path(&record))
            .await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn commit(&self, session: &SessionId, callback: &CallbackId) -> Result<()> {
        let mut record = self.spool.load_in_state(session, SessionState::Open)?;
        if !self.spool.artifact_path(&record).exists() {
            return Err(UpdateError::Install(format!(
                "Session {} has no artifact",
                session
            )));
        }
        record.callback = Some(callback.clone());
        self.spool.transition(&mut record, SessionState::Committed)?;
        Ok(())
    }

    async fn abandon(&self, session: &SessionId) -> Result<()> {
        self.spool.remove(session)?;
        debug!("Abandoned session {}", session);
        Ok(())
    }
}
