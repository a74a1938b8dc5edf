//! kioskd - Kiosk install daemon
//!
//! Plays the platform installer's part for the update core: runs committed
//! install sessions from the spool and delivers one completion ticket per
//! session to the inbox, where registered handlers pick them up.

pub mod command;
pub mod completion_handler;
pub mod daemon;
pub mod listener;
pub mod spool_runner;
pub mod watcher;

pub use completion_handler::{CommandHostActions, HostActions, InstallCompletionHandler};
pub use daemon::{Daemon, Sweep};
pub use listener::{CompletionHandler, CompletionListener, DrainReport};
pub use spool_runner::{Recovery, SpoolRunner};
