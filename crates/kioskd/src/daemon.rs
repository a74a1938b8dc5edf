//! Daemon loop: run committed installs, dispatch their tickets.

use crate::completion_handler::{HostActions, InstallCompletionHandler};
use crate::listener::{CompletionListener, DrainReport};
use crate::spool_runner::{Recovery, SpoolRunner};
use crate::watcher::{SpoolEvent, SpoolWatcher};
use anyhow::Result;
use kiosk_common::completion::Inbox;
use kiosk_common::spool::Spool;
use kiosk_common::version::RecordedInstall;
use kiosk_common::{CallbackId, KioskConfig};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Periodic sweep, in case a notification was missed
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Work done by one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    pub installed: usize,
    pub tickets: DrainReport,
}

pub struct Daemon {
    runner: SpoolRunner,
    listener: CompletionListener,
    sessions_dir: PathBuf,
    inbox_dir: PathBuf,
}

impl Daemon {
    /// Daemon with the update completion handler registered
    pub fn new(config: &KioskConfig, host: Arc<dyn HostActions>) -> Self {
        let storage = &config.storage;
        let inbox = Inbox::new(storage.inbox_dir());
        let runner = SpoolRunner::new(
            Spool::new(storage.sessions_dir()),
            inbox.clone(),
            config.installer.clone(),
        );

        let mut listener = CompletionListener::new(inbox);
        let installed = RecordedInstall::new(storage.installed_path(), &config.app);
        listener.register(
            CallbackId::update_complete(),
            Arc::new(InstallCompletionHandler::new(installed, host)),
        );

        Self {
            runner,
            listener,
            sessions_dir: storage.sessions_dir(),
            inbox_dir: storage.inbox_dir(),
        }
    }

    /// Recover the spool, then deliver whatever accumulated while down
    pub async fn startup(&self) -> (Recovery, Sweep) {
        let recovery = self.runner.recover();
        if recovery != Recovery::default() {
            info!(
                "Recovered spool: {} interrupted, {} abandoned",
                recovery.interrupted, recovery.abandoned
            );
        }
        (recovery, self.sweep().await)
    }

    pub async fn sweep(&self) -> Sweep {
        let sweep = Sweep {
            installed: self.runner.run_pending().await,
            tickets: self.listener.drain().await,
        };
        if sweep != Sweep::default() {
            debug!("{:?}", sweep);
        }
        sweep
    }

    /// Sweep on every session change and every `SWEEP_INTERVAL`, drain the
    /// inbox on every delivered ticket, until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = match SpoolWatcher::new(&self.sessions_dir, &self.inbox_dir, tx) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("File watching unavailable, sweeping every {:?}: {}", SWEEP_INTERVAL, e);
                None
            }
        };

        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    return Ok(());
                }
                Some(event) = rx.recv() => {
                    let mut sessions = event == SpoolEvent::SessionChanged;
                    while let Ok(more) = rx.try_recv() {
                        sessions |= more == SpoolEvent::SessionChanged;
                    }
                    if sessions {
                        self.sweep().await;
                    } else {
                        self.listener.drain().await;
                    }
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
