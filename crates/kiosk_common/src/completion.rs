//! Install completion tickets and the durable inbox they are delivered to.
//!
//! The installer drops one ticket per committed session into
//! `inbox/<callback-id>/<ticket-id>.json`. Tickets stay on disk until the
//! handler registered for that callback identity has processed them, so a
//! restart between "install finished" and "handled" redelivers the ticket.

use crate::atomic::{atomic_write_json, now_ms};
use crate::install::SessionId;
use crate::version::InstalledVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Status wire codes (same values the Android package installer uses)
pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_PENDING_USER_ACTION: i32 = -1;
pub const STATUS_FAILURE: i32 = 1;

/// Stable, process-independent identity a ticket is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(String);

impl CallbackId {
    /// Identity the update coordinator registers its commits under
    pub const UPDATE_COMPLETE: &'static str = "kiosk.update.complete";

    /// Accepts `[A-Za-z0-9._-]+`; the id doubles as a directory name.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        valid.then_some(Self(id))
    }

    pub fn update_complete() -> Self {
        Self(Self::UPDATE_COMPLETE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded install outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    /// Installer needs the user to confirm; carries the confirmation handle
    PendingUserAction { confirmation: Option<String> },
    Failure { message: String },
}

impl CompletionStatus {
    pub fn code(&self) -> i32 {
        match self {
            CompletionStatus::Success => STATUS_SUCCESS,
            CompletionStatus::PendingUserAction { .. } => STATUS_PENDING_USER_ACTION,
            CompletionStatus::Failure { .. } => STATUS_FAILURE,
        }
    }
}

/// One completion event, as stored in the inbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTicket {
    pub ticket_id: String,
    pub session_id: SessionId,
    pub callback: CallbackId,
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
    /// Version that is installed once this ticket reports success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<InstalledVersion>,
    pub issued_at_ms: i64,
}

impl CompletionTicket {
    pub fn new(
        session_id: SessionId,
        callback: CallbackId,
        status: CompletionStatus,
        target: Option<InstalledVersion>,
    ) -> Self {
        let code = status.code();
        let (message, confirmation) = match status {
            CompletionStatus::Success => (None, None),
            CompletionStatus::PendingUserAction { confirmation } => (None, confirmation),
            CompletionStatus::Failure { message } => (Some(message), None),
        };
        Self {
            ticket_id: uuid::Uuid::new_v4().to_string(),
            session_id,
            callback,
            status: code,
            message,
            confirmation,
            target,
            issued_at_ms: now_ms(),
        }
    }

    /// Decode the wire status; unknown codes are failures
    pub fn status(&self) -> CompletionStatus {
        match self.status {
            STATUS_SUCCESS => CompletionStatus::Success,
            STATUS_PENDING_USER_ACTION => CompletionStatus::PendingUserAction {
                confirmation: self.confirmation.clone(),
            },
            other => CompletionStatus::Failure {
                message: self
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("installer status {}", other)),
            },
        }
    }
}

/// A ticket file found in the inbox
#[derive(Debug)]
pub struct InboxEntry {
    pub path: PathBuf,
    pub ticket: Result<CompletionTicket, String>,
}

/// Durable ticket inbox, one directory per callback identity
#[derive(Debug, Clone)]
pub struct Inbox {
    root: PathBuf,
}

impl Inbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, callback: &CallbackId) -> PathBuf {
        self.root.join(callback.as_str())
    }

    /// Persist a ticket for its callback identity
    pub fn deliver(&self, ticket: &CompletionTicket) -> io::Result<PathBuf> {
        let path = self
            .dir_for(&ticket.callback)
            .join(format!("{}.json", ticket.ticket_id));
        atomic_write_json(&path, ticket)?;
        debug!("Delivered ticket {} for {}", ticket.ticket_id, ticket.callback);
        Ok(path)
    }

    /// Callback identities that currently have a directory
    pub fn callbacks(&self) -> Vec<CallbackId> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut ids: Vec<CallbackId> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| CallbackId::new(e.file_name().to_string_lossy().to_string()))
            .collect();
        ids.sort();
        ids
    }

    /// Undelivered tickets for `callback`, oldest first
    pub fn pending(&self, callback: &CallbackId) -> Vec<InboxEntry> {
        let dir = self.dir_for(callback);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut found: Vec<InboxEntry> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .map(|path| {
                let ticket = fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|c| serde_json::from_str::<CompletionTicket>(&c).map_err(|e| e.to_string()));
                InboxEntry { path, ticket }
            })
            .collect();

        found.sort_by_key(|e| match &e.ticket {
            Ok(t) => (t.issued_at_ms, e.path.clone()),
            Err(_) => (i64::MIN, e.path.clone()),
        });
        found
    }

    /// Total undelivered tickets across all identities
    pub fn pending_count(&self) -> usize {
        self.callbacks().iter().map(|c| self.pending(c).len()).sum()
    }

    /// Remove a handled ticket
    pub fn acknowledge(&self, path: &Path) -> io::Result<()> {
        crate::atomic::safe_delete(path)?;
        crate::atomic::safe_delete(&attempts_path(path))
    }

    /// Count one more failed handling of the ticket at `path`; returns the
    /// total so far
    pub fn record_failure(&self, path: &Path) -> io::Result<u32> {
        let marker = attempts_path(path);
        let previous = fs::read_to_string(&marker)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        let attempts = previous.saturating_add(1);
        crate::atomic::atomic_write(&marker, attempts.to_string().as_bytes())?;
        Ok(attempts)
    }

    /// Move a ticket aside (`.bad`) so it is never handed out again
    pub fn quarantine(&self, path: &Path) -> io::Result<()> {
        let bad = path.with_extension("bad");
        warn!("Setting aside ticket {}", path.display());
        fs::rename(path, bad)?;
        crate::atomic::safe_delete(&attempts_path(path))
    }
}

fn attempts_path(ticket: &Path) -> PathBuf {
    ticket.with_extension("attempts")
}
