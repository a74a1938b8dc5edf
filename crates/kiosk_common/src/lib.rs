//! Kiosk Common - Self-update core for the kiosk launcher
//!
//! Checks the release feed, downloads and verifies artifacts, keeps a
//! rollback-capable version history and stages installs with the platform
//! installer. Completion of an install is delivered later through the
//! ticket inbox (see `completion`).

pub mod atomic;
pub mod completion;
pub mod config;
pub mod download;
pub mod error;
pub mod github_releases;
pub mod install;
pub mod lock;
pub mod network;
pub mod spool;
pub mod updater;
pub mod version;
pub mod version_store;

pub use completion::{CallbackId, CompletionStatus, CompletionTicket};
pub use config::KioskConfig;
pub use error::UpdateError;
pub use github_releases::{ReleaseCheck, ReleaseFetcher, UpdateDescriptor};
pub use install::{InstallOrchestrator, PackageInstaller, SessionId, SessionParams};
pub use network::{ConnectivityProvider, NetworkPath, PathKind};
pub use updater::{Committed, UpdateCoordinator, UpdateOutcome, VersionChoice};
pub use version::{compare_versions, InstalledVersion};
pub use version_store::{StoredVersion, VersionStore};
