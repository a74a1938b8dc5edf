//! GitHub Releases client
//!
//! Fetches the latest release descriptor over a chosen network path and
//! turns it into an installable update, if it is newer than what runs now.

use crate::config::ReleaseConfig;
use crate::error::{Result, UpdateError};
use crate::network::NetworkPath;
use crate::version::{compare_versions, label_from_tag, InstalledVersion};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// GitHub release information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl GitHubRelease {
    /// Version label from the tag (leading 'v' stripped)
    pub fn version(&self) -> &str {
        label_from_tag(&self.tag_name)
    }

    /// Assets whose name ends in `.<extension>`
    pub fn artifacts(&self, extension: &str) -> Vec<&GitHubAsset> {
        let suffix = format!(".{}", extension.to_lowercase());
        self.assets
            .iter()
            .filter(|a| a.name.to_lowercase().ends_with(&suffix))
            .collect()
    }

    /// Asset with exactly this name
    pub fn find_asset(&self, name: &str) -> Option<&GitHubAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// One available remote release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    /// Synthesized as installed code + 1; the feed carries no version code
    pub target_version_code: u32,
    pub version_label: String,
    pub artifact_url: String,
    pub checksum_manifest_url: Option<String>,
}

/// Outcome of a successful feed query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseCheck {
    Newer(UpdateDescriptor),
    NotNewer { remote_label: String },
}

/// Build an HTTP client pinned to `path`
pub(crate) fn client_for(path: &NetworkPath, config: &ReleaseConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.connect_timeout())
        .local_address(path.local_addr)
        .build()
        .map_err(|e| UpdateError::TransientNetwork(format!("HTTP client setup failed: {}", e)))
}

/// Map a transport error onto the taxonomy
pub(crate) fn classify(e: reqwest::Error) -> UpdateError {
    if e.is_timeout() {
        UpdateError::TransientNetwork("Connection timed out".to_string())
    } else if e.is_connect() {
        debug!("Connect error: {}", e);
        UpdateError::NoConnectivity
    } else {
        debug!("Transport error: {}", e);
        UpdateError::TransientNetwork("Connection failed".to_string())
    }
}

/// Run `fut` with a read deadline; elapsing reads as a timeout
pub(crate) async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, reqwest::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(classify),
        Err(_) => Err(UpdateError::TransientNetwork("Connection timed out".to_string())),
    }
}

/// Queries the release feed
#[derive(Debug, Clone)]
pub struct ReleaseFetcher {
    config: ReleaseConfig,
}

impl ReleaseFetcher {
    pub fn new(config: ReleaseConfig) -> Self {
        Self { config }
    }

    /// Fetch and parse the latest release. One request, no retries.
    pub async fn latest_release(&self, path: &NetworkPath) -> Result<GitHubRelease> {
        let url = self.config.latest_release_url();
        let client = client_for(path, &self.config)?;
        debug!("GET {} via {}", url, path.interface);

        let send_limit = self.config.connect_timeout() + self.config.read_timeout();
        let response = with_deadline(
            send_limit,
            client
                .get(&url)
                .header("Accept", "application/vnd.github.v3+json")
                .send(),
        )
        .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(UpdateError::Protocol("No release published".to_string()));
        }
        if !status.is_success() {
            return Err(UpdateError::TransientNetwork(format!(
                "Release feed returned {}",
                status
            )));
        }

        let body = with_deadline(self.config.read_timeout(), response.text()).await?;
        serde_json::from_str(&body).map_err(|e| {
            warn!("Unparseable release JSON: {}", e);
            UpdateError::Protocol("Invalid release response".to_string())
        })
    }

    /// Compare the latest release against `installed` and extract the
    /// artifact and checksum manifest URLs when it is newer.
    pub async fn fetch_latest(
        &self,
        path: &NetworkPath,
        installed: &InstalledVersion,
    ) -> Result<ReleaseCheck> {
        let release = self.latest_release(path).await?;
        self.evaluate(&release, installed)
    }

    /// Pure part of `fetch_latest`
    pub fn evaluate(&self, release: &GitHubRelease, installed: &InstalledVersion) -> Result<ReleaseCheck> {
        let remote = release.version();

        if compare_versions(remote, &installed.label) != Ordering::Greater {
            debug!("Remote {} is not newer than installed {}", remote, installed.label);
            return Ok(ReleaseCheck::NotNewer {
                remote_label: remote.to_string(),
            });
        }

        let artifacts = release.artifacts(&self.config.artifact_extension);
        let artifact = match artifacts.as_slice() {
            [] => {
                return Err(UpdateError::Protocol(
                    "No installable artifact in release".to_string(),
                ))
            }
            [only] => *only,
            [first, ..] => {
                warn!(
                    "Release {} has {} .{} assets, using {}",
                    release.tag_name,
                    artifacts.len(),
                    self.config.artifact_extension,
                    first.name
                );
                *first
            }
        };

        let checksum = release.find_asset(&self.config.checksum_asset);

        info!("Update available: {} -> {}", installed.label, remote);
        Ok(ReleaseCheck::Newer(UpdateDescriptor {
            target_version_code: installed.code.saturating_add(1),
            version_label: remote.to_string(),
            artifact_url: artifact.browser_download_url.clone(),
            checksum_manifest_url: checksum.map(|a| a.browser_download_url.clone()),
        }))
    }
}
