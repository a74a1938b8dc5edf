//! Exclusive update lock.
//!
//! apply and rollback both write the staging file and the catalog, so they
//! hold an advisory `flock` on `updates/update.lock` for their whole run.
//! A second caller is rejected with `UpdateError::Busy` instead of queueing.

use crate::error::{Result, UpdateError};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE: &str = "update.lock";

/// Held for the duration of one apply/rollback; released on drop
#[derive(Debug)]
pub struct UpdateLock {
    _guard: Flock<File>,
    path: PathBuf,
}

impl UpdateLock {
    /// Take the lock without waiting
    pub fn try_acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(guard) => {
                debug!("Acquired {}", path.display());
                Ok(Self {
                    _guard: guard,
                    path: path.to_path_buf(),
                })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(UpdateError::Busy),
            Err((_, errno)) => Err(UpdateError::Storage(std::io::Error::from(errno))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        debug!("Released {}", self.path.display());
    }
}
