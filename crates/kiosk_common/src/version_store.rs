//! Version Store - Rollback catalog of installed artifacts
//!
//! Catalog file: <data_dir>/updates/versions.json, a JSON array of
//! `{code, name, file, date}`. The file on disk is the only source of truth;
//! nothing is cached between calls.

use crate::atomic::{atomic_write_json, safe_delete};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CATALOG_FILE: &str = "versions.json";

/// One retained artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVersion {
    pub code: u32,
    #[serde(rename = "name")]
    pub label: String,
    /// File name inside the updates directory
    #[serde(rename = "file")]
    pub file_name: String,
    #[serde(rename = "date")]
    pub installed_at_ms: i64,
}

impl StoredVersion {
    /// Install date for pickers, e.g. "Mar 4, 2026"
    pub fn format_date(&self) -> String {
        use chrono::{Local, TimeZone};
        match Local.timestamp_millis_opt(self.installed_at_ms) {
            chrono::LocalResult::Single(dt) => dt.format("%b %-d, %Y").to_string(),
            _ => format!("epoch-ms:{}", self.installed_at_ms),
        }
    }
}

/// Durable catalog of previously installed artifacts
#[derive(Debug, Clone)]
pub struct VersionStore {
    dir: PathBuf,
}

impl VersionStore {
    pub fn new(updates_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: updates_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dir.join(CATALOG_FILE)
    }

    /// Deterministic retained file name for a version code
    pub fn file_name_for(code: u32, extension: &str) -> String {
        format!("v{}.{}", code, extension)
    }

    /// Where the artifact of `version` lives. None for names that would
    /// escape the updates directory.
    pub fn artifact_path(&self, version: &StoredVersion) -> Option<PathBuf> {
        let name = Path::new(&version.file_name);
        match name.file_name() {
            Some(base) if base == name.as_os_str() => Some(self.dir.join(name)),
            _ => None,
        }
    }

    fn read_raw(&self) -> Vec<StoredVersion> {
        let path = self.catalog_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Corrupt catalog {}: {}", path.display(), e);
            Vec::new()
        })
    }

    fn write(&self, versions: &[StoredVersion]) -> io::Result<()> {
        atomic_write_json(&self.catalog_path(), versions)
    }

    /// Catalog newest-first, without entries whose file is gone. Never fails.
    pub fn list(&self) -> Vec<StoredVersion> {
        let mut versions: Vec<StoredVersion> = self
            .read_raw()
            .into_iter()
            .filter(|v| self.artifact_path(v).map(|p| p.exists()).unwrap_or(false))
            .collect();
        versions.sort_by(|a, b| b.code.cmp(&a.code));
        versions
    }

    /// Insert or replace the entry with `version.code` and persist.
    pub fn save(&self, version: StoredVersion) -> io::Result<()> {
        let mut versions = self.list();
        versions.retain(|v| v.code != version.code);
        debug!("Saving v{} ({}) to catalog", version.code, version.label);
        versions.insert(0, version);
        self.write(&versions)
    }

    /// Keep the `bound` highest codes; delete the files of the rest.
    /// Returns the entries that were dropped.
    pub fn prune(&self, bound: usize) -> io::Result<Vec<StoredVersion>> {
        let versions = self.list();
        if versions.len() <= bound {
            return Ok(Vec::new());
        }

        let (kept, dropped) = versions.split_at(bound);
        for old in dropped {
            if let Some(path) = self.artifact_path(old) {
                safe_delete(&path)?;
            }
        }
        self.write(kept)?;

        info!("Pruned {} old version(s), {} retained", dropped.len(), kept.len());
        Ok(dropped.to_vec())
    }

    pub fn find_by_code(&self, code: u32) -> Option<StoredVersion> {
        self.list().into_iter().find(|v| v.code == code)
    }
}
