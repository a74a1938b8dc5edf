//! Version comparison and the installed-version record.

use crate::atomic::atomic_write_json;
use crate::config::AppConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Compare two dotted numeric versions component-wise.
///
/// Non-numeric segments count as 0 and the shorter side is padded with
/// zeros, so `"1.2"` equals `"1.2.0"` and malformed input never fails.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|s| s.parse().unwrap_or(0)).collect() };

    let left = parse(a);
    let right = parse(b);
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Strip a leading `v`/`V` from a release tag.
pub fn label_from_tag(tag: &str) -> &str {
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

/// What is installed on the device right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub code: u32,
    pub label: String,
}

/// Source of the installed version (the platform's package info)
pub trait InstalledVersionSource: Send + Sync {
    fn current(&self) -> InstalledVersion;
}

/// Installed version as recorded by the completion handler after each
/// successful install, falling back to `[app]` from the config.
pub struct RecordedInstall {
    path: PathBuf,
    fallback: InstalledVersion,
}

impl RecordedInstall {
    pub fn new(path: impl Into<PathBuf>, app: &AppConfig) -> Self {
        Self {
            path: path.into(),
            fallback: InstalledVersion {
                code: app.version_code,
                label: app.version_label.clone(),
            },
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, version: &InstalledVersion) -> std::io::Result<()> {
        atomic_write_json(&self.path, version)
    }
}

impl InstalledVersionSource for RecordedInstall {
    fn current(&self) -> InstalledVersion {
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Ignoring unreadable {}: {}", self.path.display(), e);
                    self.fallback.clone()
                }
            },
            Err(_) => self.fallback.clone(),
        }
    }
}

/// Fixed installed version, for tests and one-shot tools
impl InstalledVersionSource for InstalledVersion {
    fn current(&self) -> InstalledVersion {
        self.clone()
    }
}
