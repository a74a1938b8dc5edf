//! Spool Runner - Installs committed sessions and delivers their tickets
//!
//! Session lifecycle on disk:
//!   open -> committed (kioskctl) -> installing (here) -> ticket + removed
//!
//! The ticket is written before the session is removed. A crash in between
//! leaves an `installing` session that is re-run on the next start, so a
//! completion may be reported twice but never lost.

use crate::command::{self, CommandOutput};
use kiosk_common::atomic::now_ms;
use kiosk_common::completion::Inbox;
use kiosk_common::config::InstallerConfig;
use kiosk_common::spool::{SessionRecord, SessionState, Spool};
use kiosk_common::{CallbackId, CompletionStatus, CompletionTicket};
use std::path::Path;
use tracing::{error, info, warn};

/// What `recover` found at startup
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub interrupted: usize,
    pub abandoned: usize,
}

pub struct SpoolRunner {
    spool: Spool,
    inbox: Inbox,
    config: InstallerConfig,
}

impl SpoolRunner {
    pub fn new(spool: Spool, inbox: Inbox, config: InstallerConfig) -> Self {
        Self {
            spool,
            inbox,
            config,
        }
    }

    /// Requeue installs cut short by a restart and drop open sessions whose
    /// writer went away.
    pub fn recover(&self) -> Recovery {
        let mut recovery = Recovery::default();
        let stale_before = stale_cutoff(now_ms(), self.config.stale_session_secs);

        for mut record in self.spool.list() {
            match record.state {
                SessionState::Installing => {
                    warn!("Session {} was interrupted while installing, requeueing", record.id);
                    match self.spool.transition(&mut record, SessionState::Committed) {
                        Ok(()) => recovery.interrupted += 1,
                        Err(e) => error!("Cannot requeue session {}: {}", record.id, e),
                    }
                }
                SessionState::Open if record.updated_at_ms < stale_before => {
                    info!("Abandoning stale open session {}", record.id);
                    match self.spool.remove(&record.id) {
                        Ok(()) => recovery.abandoned += 1,
                        Err(e) => error!("Cannot remove session {}: {}", record.id, e),
                    }
                }
                _ => {}
            }
        }
        recovery
    }

    /// Install every committed session, oldest first. Returns how many
    /// tickets were delivered.
    pub async fn run_pending(&self) -> usize {
        let mut delivered = 0;
        for record in self.spool.list() {
            if record.state != SessionState::Committed {
                continue;
            }
            if self.process(record).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn process(&self, mut record: SessionRecord) -> bool {
        if let Err(e) = self.spool.transition(&mut record, SessionState::Installing) {
            error!("Cannot start session {}: {}", record.id, e);
            return false;
        }

        let artifact = self.spool.artifact_path(&record);
        let status = if artifact.exists() {
            self.install(&artifact, record.params.allow_downgrade).await
        } else {
            CompletionStatus::Failure {
                message: format!("Artifact {} is missing", record.params.artifact_name),
            }
        };

        match &status {
            CompletionStatus::Success => info!("Session {} installed", record.id),
            CompletionStatus::PendingUserAction { .. } => {
                info!("Session {} waits for user confirmation", record.id)
            }
            CompletionStatus::Failure { message } => warn!("Session {} failed: {}", record.id, message),
        }

        let callback = record.callback.clone().unwrap_or_else(|| {
            warn!("Session {} has no callback, using {}", record.id, CallbackId::UPDATE_COMPLETE);
            CallbackId::update_complete()
        });
        let ticket = CompletionTicket::new(record.id.clone(), callback, status, record.params.target.clone());
        if let Err(e) = self.inbox.deliver(&ticket) {
            // Session stays `installing` and is retried after restart
            error!("Cannot deliver ticket for session {}: {}", record.id, e);
            return false;
        }

        if let Err(e) = self.spool.remove(&record.id) {
            warn!("Cannot remove finished session {}: {}", record.id, e);
        }
        true
    }

    async fn install(&self, artifact: &Path, allow_downgrade: bool) -> CompletionStatus {
        let argv = self.install_argv(artifact, allow_downgrade);
        match command::run(&argv).await {
            Ok(output) => self.status_for(&output),
            Err(e) => CompletionStatus::Failure {
                message: format!("{:#}", e),
            },
        }
    }

    /// Install command for `artifact`; the downgrade flag goes right before
    /// the artifact argument.
    pub fn install_argv(&self, artifact: &Path, allow_downgrade: bool) -> Vec<String> {
        let mut template = self.config.install_command.clone();
        let slot = match template.iter().position(|a| a.contains("{artifact}")) {
            Some(i) => i,
            None => {
                template.push("{artifact}".to_string());
                template.len() - 1
            }
        };
        if allow_downgrade {
            if let Some(flag) = &self.config.downgrade_arg {
                template.insert(slot, flag.clone());
            }
        }
        let path = artifact.to_string_lossy();
        command::expand(&template, &[("artifact", path.as_ref())])
    }

    /// Map installer exit status onto a completion status
    pub fn status_for(&self, output: &CommandOutput) -> CompletionStatus {
        match output.code {
            Some(0) => CompletionStatus::Success,
            Some(code) if code == self.config.pending_exit_code => {
                let handle = output.stdout.trim();
                CompletionStatus::PendingUserAction {
                    confirmation: (!handle.is_empty()).then(|| handle.to_string()),
                }
            }
            Some(code) => CompletionStatus::Failure {
                message: output
                    .last_line()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("installer exited with {}", code)),
            },
            None => CompletionStatus::Failure {
                message: "installer was killed".to_string(),
            },
        }
    }
}

/// Sessions last touched before this instant count as stale
fn stale_cutoff(now_ms: i64, stale_secs: u64) -> i64 {
    let window = i64::try_from(stale_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    now_ms.saturating_sub(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_common::install::SessionParams;
    use kiosk_common::spool::SpoolInstaller;
    use kiosk_common::{InstalledVersion, PackageInstaller};
    use std::fs;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "{artifact}".into()]
    }

    fn setup(install_command: Vec<String>) -> (TempDir, SpoolRunner, SpoolInstaller, Inbox) {
        let dir = TempDir::new().unwrap();
        let spool = Spool::new(dir.path().join("sessions"));
        let inbox = Inbox::new(dir.path().join("inbox"));
        let config = InstallerConfig {
            install_command,
            ..Default::default()
        };
        let runner = SpoolRunner::new(spool.clone(), inbox.clone(), config);
        (dir, runner, SpoolInstaller::new(spool), inbox)
    }

    async fn commit(installer: &SpoolInstaller, downgrade: bool) -> SessionRecord {
        let params = SessionParams {
            allow_downgrade: downgrade,
            artifact_name: "update.apk".into(),
            target: Some(InstalledVersion {
                code: 8,
                label: "2.3.0".into(),
            }),
        };
        let id = installer.create_session(&params).await.unwrap();
        let mut data: &[u8] = b"apk";
        installer.write(&id, "update.apk", &mut data, 3).await.unwrap();
        installer.commit(&id, &CallbackId::update_complete()).await.unwrap();
        installer.spool().load(&id).unwrap()
    }

    #[test]
    fn test_install_argv_inserts_downgrade_flag() {
        let (_dir, runner, _, _) = setup(InstallerConfig::default().install_command);
        let path = Path::new("/data/kiosk/v3.apk");
        assert_eq!(
            runner.install_argv(path, false),
            vec!["pm", "install", "-r", "/data/kiosk/v3.apk"]
        );
        assert_eq!(
            runner.install_argv(path, true),
            vec!["pm", "install", "-r", "-d", "/data/kiosk/v3.apk"]
        );
    }

    #[test]
    fn test_install_argv_appends_artifact_without_placeholder() {
        let (_dir, runner, _, _) = setup(vec!["installer".into()]);
        assert_eq!(
            runner.install_argv(Path::new("/a.apk"), true),
            vec!["installer", "-d", "/a.apk"]
        );
    }

    #[test]
    fn test_status_mapping() {
        let (_dir, runner, _, _) = setup(Vec::new());
        let out = |code, stdout: &str, stderr: &str| CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        };

        assert_eq!(runner.status_for(&out(Some(0), "Success", "")), CompletionStatus::Success);
        assert_eq!(
            runner.status_for(&out(Some(3), "confirm://7\n", "")),
            CompletionStatus::PendingUserAction {
                confirmation: Some("confirm://7".into())
            }
        );
        assert_eq!(
            runner.status_for(&out(Some(1), "", "Failure [INSTALL_FAILED_VERSION_DOWNGRADE]")),
            CompletionStatus::Failure {
                message: "Failure [INSTALL_FAILED_VERSION_DOWNGRADE]".into()
            }
        );
        assert_eq!(
            runner.status_for(&out(Some(4), "", "")),
            CompletionStatus::Failure {
                message: "installer exited with 4".into()
            }
        );
        assert!(matches!(
            runner.status_for(&out(None, "", "")),
            CompletionStatus::Failure { .. }
        ));
    }

    #[tokio::test]
    async fn test_committed_session_yields_one_ticket() {
        let (_dir, runner, installer, inbox) = setup(sh("test -f \"$0\""));
        let record = commit(&installer, false).await;

        assert_eq!(runner.run_pending().await, 1);
        assert!(installer.spool().list().is_empty());

        let pending = inbox.pending(&CallbackId::update_complete());
        assert_eq!(pending.len(), 1);
        let ticket = pending[0].ticket.as_ref().unwrap();
        assert_eq!(ticket.session_id, record.id);
        assert_eq!(ticket.status(), CompletionStatus::Success);
        assert_eq!(ticket.target.as_ref().unwrap().code, 8);

        // Nothing left to run
        assert_eq!(runner.run_pending().await, 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_reports_failure() {
        let (_dir, runner, installer, inbox) = setup(sh("exit 0"));
        let record = commit(&installer, false).await;
        fs::remove_file(installer.spool().artifact_path(&record)).unwrap();

        assert_eq!(runner.run_pending().await, 1);
        let pending = inbox.pending(&CallbackId::update_complete());
        assert!(matches!(
            pending[0].ticket.as_ref().unwrap().status(),
            CompletionStatus::Failure { .. }
        ));
    }

    #[tokio::test]
    async fn test_recover_requeues_interrupted_and_drops_stale() {
        let (_dir, runner, installer, inbox) = setup(sh("exit 0"));

        let mut interrupted = commit(&installer, true).await;
        installer
            .spool()
            .transition(&mut interrupted, SessionState::Installing)
            .unwrap();

        let id = installer
            .create_session(&SessionParams {
                allow_downgrade: false,
                artifact_name: "update.apk".into(),
                target: None,
            })
            .await
            .unwrap();
        let mut stale = installer.spool().load(&id).unwrap();
        stale.updated_at_ms = 0;
        installer.spool().store(&stale).unwrap();

        let fresh = installer
            .create_session(&SessionParams {
                allow_downgrade: false,
                artifact_name: "update.apk".into(),
                target: None,
            })
            .await
            .unwrap();

        let recovery = runner.recover();
        assert_eq!(
            recovery,
            Recovery {
                interrupted: 1,
                abandoned: 1
            }
        );
        assert_eq!(runner.run_pending().await, 1);
        assert_eq!(inbox.pending_count(), 1);

        // The fresh open session belongs to a live writer and is kept
        let left: Vec<_> = installer.spool().list().into_iter().map(|r| r.id).collect();
        assert_eq!(left, vec![fresh]);
    }

    #[test]
    fn test_stale_cutoff_saturates() {
        assert_eq!(stale_cutoff(10_000, 3), 7_000);
        assert_eq!(stale_cutoff(10_000, u64::MAX), 10_000i64.saturating_sub(i64::MAX));
        assert_eq!(stale_cutoff(i64::MIN + 5, 60), i64::MIN);
    }

    #[tokio::test]
    async fn test_huge_stale_window_keeps_open_sessions() {
        let dir = TempDir::new().unwrap();
        let spool = Spool::new(dir.path().join("sessions"));
        let config = InstallerConfig {
            stale_session_secs: u64::MAX,
            ..Default::default()
        };
        let runner = SpoolRunner::new(spool.clone(), Inbox::new(dir.path().join("inbox")), config);
        let installer = SpoolInstaller::new(spool);

        let id = installer
            .create_session(&SessionParams {
                allow_downgrade: false,
                artifact_name: "update.apk".into(),
                target: None,
            })
            .await
            .unwrap();
        let mut old = installer.spool().load(&id).unwrap();
        old.updated_at_ms = 0;
        installer.spool().store(&old).unwrap();

        assert_eq!(runner.recover(), Recovery::default());
        assert_eq!(installer.spool().list().len(), 1);
    }
}
