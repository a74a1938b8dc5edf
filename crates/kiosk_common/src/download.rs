//! Artifact download with optional SHA-256 verification.

use crate::atomic::safe_delete;
use crate::config::ReleaseConfig;
use crate::error::{Result, UpdateError};
use crate::github_releases::{classify, client_for, with_deadline, UpdateDescriptor};
use crate::network::NetworkPath;
use futures_util::StreamExt;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const HASH_CHUNK: usize = 8192;

/// First 64-hex-character token in a checksum manifest, lowercased
pub fn extract_sha256(manifest: &str) -> Option<String> {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TOKEN
        .get_or_init(|| Regex::new(r"[0-9a-fA-F]{64}").ok())
        .as_ref()?;
    re.find(manifest).map(|m| m.as_str().to_lowercase())
}

/// Calculate SHA-256 of a file, streaming fixed-size chunks
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Streams artifacts into the staging file and verifies them
#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    config: ReleaseConfig,
    staging_path: PathBuf,
}

impl ArtifactDownloader {
    pub fn new(config: ReleaseConfig, updates_dir: &Path) -> Self {
        let staging_path = updates_dir.join(format!("temp.{}", config.artifact_extension));
        Self {
            config,
            staging_path,
        }
    }

    /// Fixed staging location, reused across attempts
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Download `descriptor`'s artifact over `path` and verify it against the
    /// published digest if one can be obtained. On any failure the staging
    /// file is removed.
    pub async fn fetch_and_verify(
        &self,
        path: &NetworkPath,
        descriptor: &UpdateDescriptor,
    ) -> Result<PathBuf> {
        let client = client_for(path, &self.config)?;

        info!("Downloading {} ...", descriptor.artifact_url);
        if let Err(e) = self.stream_to_staging(&client, &descriptor.artifact_url).await {
            error!("Download failed: {}", e);
            let _ = safe_delete(&self.staging_path);
            return Err(e);
        }

        if let Some(manifest_url) = &descriptor.checksum_manifest_url {
            match self.fetch_expected_digest(&client, manifest_url).await {
                Some(expected) => self.verify(&expected).await?,
                None => warn!("No usable checksum for {}, skipping verification", descriptor.version_label),
            }
        } else {
            debug!("Release {} publishes no checksum manifest", descriptor.version_label);
        }

        Ok(self.staging_path.clone())
    }

    async fn stream_to_staging(&self, client: &reqwest::Client, url: &str) -> Result<u64> {
        if let Some(parent) = self.staging_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let send_limit = self.config.connect_timeout() + self.config.read_timeout();
        let response = with_deadline(send_limit, client.get(url).send()).await?;
        if !response.status().is_success() {
            return Err(UpdateError::TransientNetwork(format!(
                "Download failed: {}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(&self.staging_path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = tokio::time::timeout(self.config.read_timeout(), stream.next())
                .await
                .map_err(|_| UpdateError::TransientNetwork("Connection timed out".to_string()))?;
            match next {
                Some(chunk) => {
                    let bytes = chunk.map_err(classify)?;
                    file.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                None => break,
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!("Staged {} bytes at {}", written, self.staging_path.display());
        Ok(written)
    }

    /// Digest from the manifest; any failure here means "skip verification"
    async fn fetch_expected_digest(&self, client: &reqwest::Client, url: &str) -> Option<String> {
        let send_limit = self.config.connect_timeout() + self.config.read_timeout();
        let response = match with_deadline(send_limit, client.get(url).send()).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Checksum manifest fetch failed: {}", e);
                return None;
            }
        };
        if !response.status().is_success() {
            warn!("Checksum manifest returned {}", response.status());
            return None;
        }
        match with_deadline(self.config.read_timeout(), response.text()).await {
            Ok(text) => extract_sha256(&text),
            Err(e) => {
                warn!("Checksum manifest read failed: {}", e);
                None
            }
        }
    }

    async fn verify(&self, expected: &str) -> Result<()> {
        let staged = self.staging_path.clone();
        let hashed = tokio::task::spawn_blocking(move || sha256_file(&staged))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .and_then(|r| r);
        let actual = match hashed {
            Ok(actual) => actual,
            Err(e) => {
                error!("Cannot hash {}: {}", self.staging_path.display(), e);
                let _ = safe_delete(&self.staging_path);
                return Err(e.into());
            }
        };

        if actual.eq_ignore_ascii_case(expected) {
            info!("Checksum verified ({})", &actual[..12]);
            return Ok(());
        }

        error!("Checksum mismatch: expected {}, got {}", expected, actual);
        safe_delete(&self.staging_path)?;
        Err(UpdateError::Integrity {
            expected: expected.to_string(),
            actual,
        })
    }
}
