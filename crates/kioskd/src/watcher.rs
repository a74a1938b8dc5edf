//! Spool Watcher - Wakes the daemon when sessions or tickets change
//!
//! Watches:
//! - sessions/ (a session was committed)
//! - inbox/ (a ticket was delivered)
//!
//! Events only pick what to re-scan; the scan itself reads the directories,
//! so coalesced or dropped notifications are harmless.

use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bookkeeping files that never need a re-scan
const IGNORED_EXTENSIONS: &[&str] = &["tmp", "attempts", "bad"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolEvent {
    SessionChanged,
    TicketDelivered,
}

/// What a changed path means for the daemon, None for bookkeeping files
pub fn classify(path: &Path, sessions_root: &Path) -> Option<SpoolEvent> {
    // Atomic writes land as *.tmp first; only the rename matters
    let ignored = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IGNORED_EXTENSIONS.contains(&e))
        .unwrap_or(false);
    if ignored {
        return None;
    }
    if path.starts_with(sessions_root) {
        Some(SpoolEvent::SessionChanged)
    } else {
        Some(SpoolEvent::TicketDelivered)
    }
}

pub struct SpoolWatcher {
    _watcher: RecommendedWatcher,
}

impl SpoolWatcher {
    pub fn new(
        sessions_dir: &Path,
        inbox_dir: &Path,
        tx: mpsc::UnboundedSender<SpoolEvent>,
    ) -> Result<Self> {
        std::fs::create_dir_all(sessions_dir)?;
        std::fs::create_dir_all(inbox_dir)?;

        let sessions_root = sessions_dir
            .canonicalize()
            .unwrap_or_else(|_| sessions_dir.to_path_buf());
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for path in event.paths {
                    if let Some(change) = classify(&path, &sessions_root) {
                        debug!("{:?}: {}", change, path.display());
                        let _ = tx.send(change);
                    }
                }
            }
            Err(e) => warn!("Watch error: {:?}", e),
        })?;

        watcher.watch(sessions_dir, RecursiveMode::Recursive)?;
        watcher.watch(inbox_dir, RecursiveMode::Recursive)?;

        info!(
            "Watching {} and {}",
            sessions_dir.display(),
            inbox_dir.display()
        );

        Ok(Self { _watcher: watcher })
    }
}
