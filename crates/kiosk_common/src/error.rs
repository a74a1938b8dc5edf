//! Error taxonomy for the update core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    /// No network path with Internet capability.
    #[error("No Internet connection")]
    NoConnectivity,

    /// Timeout or I/O failure while talking to the release host.
    #[error("{0}")]
    TransientNetwork(String),

    /// Downloaded artifact does not match the published digest.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Release feed answered with something we cannot use.
    #[error("{0}")]
    Protocol(String),

    /// Platform installer rejected or failed the install.
    #[error("Install failed: {0}")]
    Install(String),

    /// Another apply/rollback holds the update lock.
    #[error("Another update operation is in progress")]
    Busy,

    #[error("Version {0} is not stored on this device")]
    NotFound(u32),

    #[error("Already running this version")]
    AlreadyInstalled(u32),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpdateError {
    /// Whether re-running the same operation can succeed without outside change.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpdateError::NoConnectivity
            | UpdateError::TransientNetwork(_)
            | UpdateError::Integrity { .. }
            | UpdateError::Busy
            | UpdateError::Storage(_) => true,
            UpdateError::Protocol(_)
            | UpdateError::Install(_)
            | UpdateError::NotFound(_)
            | UpdateError::AlreadyInstalled(_)
            | UpdateError::Json(_) => false,
        }
    }

    /// Short label for logs and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::NoConnectivity => "no_connectivity",
            UpdateError::TransientNetwork(_) => "transient_network",
            UpdateError::Integrity { .. } => "integrity",
            UpdateError::Protocol(_) => "protocol",
            UpdateError::Install(_) => "install",
            UpdateError::Busy => "busy",
            UpdateError::NotFound(_) => "not_found",
            UpdateError::AlreadyInstalled(_) => "already_installed",
            UpdateError::Storage(_) => "storage",
            UpdateError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
