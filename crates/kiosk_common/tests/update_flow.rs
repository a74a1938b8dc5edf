//! Update flow tests against a local release feed
//!
//! A small axum server stands in for the release host: it serves the latest
//! release JSON, the artifact and the checksum manifest, and counts hits.

use axum::{extract::State, routing::get, Json, Router};
use kiosk_common::download::ArtifactDownloader;
use kiosk_common::spool::{SessionState, Spool, SpoolInstaller};
use kiosk_common::{
    InstalledVersion, KioskConfig, NetworkPath, PathKind, UpdateCoordinator, UpdateDescriptor,
    UpdateError, UpdateOutcome,
};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const ARTIFACT: &[u8] = b"kiosk launcher build 2.3.0";

#[derive(Clone)]
struct Feed {
    base: String,
    tag: String,
    manifest: Option<String>,
    hits: Arc<AtomicUsize>,
}

async fn latest(State(feed): State<Feed>) -> Json<serde_json::Value> {
    feed.hits.fetch_add(1, Ordering::SeqCst);
    let mut assets = vec![serde_json::json!({
        "name": "kiosk-release.apk",
        "browser_download_url": format!("{}/dl/kiosk-release.apk", feed.base),
        "size": ARTIFACT.len(),
    })];
    if feed.manifest.is_some() {
        assets.push(serde_json::json!({
            "name": "checksums.txt",
            "browser_download_url": format!("{}/dl/checksums.txt", feed.base),
        }));
    }
    Json(serde_json::json!({
        "tag_name": feed.tag,
        "name": format!("Release {}", feed.tag),
        "assets": assets,
    }))
}

async fn artifact(State(feed): State<Feed>) -> Vec<u8> {
    feed.hits.fetch_add(1, Ordering::SeqCst);
    ARTIFACT.to_vec()
}

async fn checksums(State(feed): State<Feed>) -> String {
    feed.hits.fetch_add(1, Ordering::SeqCst);
    feed.manifest.clone().unwrap_or_default()
}

/// Start the fake feed and return (base url, hit counter)
async fn serve_feed(tag: &str, manifest: Option<String>) -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));

    let feed = Feed {
        base: base.clone(),
        tag: tag.to_string(),
        manifest,
        hits: hits.clone(),
    };
    let app = Router::new()
        .route("/repos/imdtouch/JCI_Andriod12/releases/latest", get(latest))
        .route("/dl/kiosk-release.apk", get(artifact))
        .route("/dl/checksums.txt", get(checksums))
        .with_state(feed);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, hits)
}

fn artifact_sha256() -> String {
    hex::encode(Sha256::digest(ARTIFACT))
}

fn wifi() -> NetworkPath {
    NetworkPath {
        interface: "wlan0".to_string(),
        kind: PathKind::Wifi,
        internet: true,
        local_addr: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    }
}

fn installed(label: &str) -> InstalledVersion {
    InstalledVersion {
        code: 7,
        label: label.to_string(),
    }
}

struct Device {
    dir: TempDir,
    config: KioskConfig,
}

impl Device {
    fn new(api_base: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = KioskConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.release.api_base = api_base.to_string();
        config.release.connect_timeout_secs = 2;
        config.release.read_timeout_secs = 2;
        Self { dir, config }
    }

    fn spool(&self) -> Spool {
        Spool::new(self.config.storage.sessions_dir())
    }

    fn coordinator(&self, paths: Vec<NetworkPath>, label: &str) -> UpdateCoordinator {
        UpdateCoordinator::new(
            &self.config,
            Arc::new(paths),
            Arc::new(SpoolInstaller::new(self.spool())),
            Arc::new(installed(label)),
        )
    }
}

#[tokio::test]
async fn test_check_reports_newer_release() {
    let (base, _) = serve_feed("v2.3.0", None).await;
    let device = Device::new(&base);

    let outcome = device.coordinator(vec![wifi()], "2.1.0").check().await;
    let UpdateOutcome::Available(descriptor) = outcome.clone() else {
        panic!("expected an available update, got {:?}", outcome);
    };
    assert_eq!(descriptor.version_label, "2.3.0");
    assert_eq!(descriptor.target_version_code, 8);
    assert_eq!(
        descriptor.artifact_url,
        format!("{}/dl/kiosk-release.apk", base)
    );
    assert!(descriptor.checksum_manifest_url.is_none());
}

#[tokio::test]
async fn test_check_older_release_is_up_to_date() {
    let (base, _) = serve_feed("v2.0.0", None).await;
    let device = Device::new(&base);

    let outcome = device.coordinator(vec![wifi()], "2.1.0").check().await;
    assert_eq!(outcome, UpdateOutcome::UpToDate);
}

#[tokio::test]
async fn test_no_path_makes_no_requests() {
    let (base, hits) = serve_feed("v2.3.0", Some(artifact_sha256())).await;
    let device = Device::new(&base);
    let coordinator = device.coordinator(Vec::new(), "2.1.0");

    assert_eq!(coordinator.check().await, UpdateOutcome::NoConnectivity);
    let descriptor = UpdateDescriptor {
        target_version_code: 8,
        version_label: "2.3.0".to_string(),
        artifact_url: format!("{}/dl/kiosk-release.apk", base),
        checksum_manifest_url: None,
    };
    assert!(!coordinator.apply(&descriptor).await);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_refused_connection_is_no_connectivity() {
    // Grab a free port and close it again so nothing listens there
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let device = Device::new(&base);
    let outcome = device.coordinator(vec![wifi()], "2.1.0").check().await;
    assert_eq!(outcome, UpdateOutcome::NoConnectivity);
}

#[tokio::test]
async fn test_missing_release_is_failure() {
    let (base, _) = serve_feed("v2.3.0", None).await;
    let mut device = Device::new(&base);
    device.config.release.repo = "unpublished".to_string();

    let outcome = device.coordinator(vec![wifi()], "2.1.0").check().await;
    assert_eq!(
        outcome,
        UpdateOutcome::Failed("No release published".to_string())
    );
}

#[tokio::test]
async fn test_apply_verifies_retains_and_commits() {
    let manifest = format!("{}  kiosk-release.apk\n", artifact_sha256().to_uppercase());
    let (base, _) = serve_feed("v2.3.0", Some(manifest)).await;
    let device = Device::new(&base);
    let coordinator = device.coordinator(vec![wifi()], "2.1.0");

    let UpdateOutcome::Available(descriptor) = coordinator.check().await else {
        panic!("expected an available update");
    };
    let committed = coordinator.apply_detailed(&descriptor).await.unwrap();
    assert_eq!(committed.version.code, 8);
    assert_eq!(committed.version.file_name, "v8.apk");
    assert!(!committed.allow_downgrade);

    let updates = device.config.storage.updates_dir();
    assert!(!updates.join("temp.apk").exists());
    assert_eq!(std::fs::read(updates.join("v8.apk")).unwrap(), ARTIFACT);
    assert_eq!(coordinator.store().find_by_code(8).unwrap().label, "2.3.0");

    let sessions = device.spool().list();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, committed.session);
    assert_eq!(sessions[0].state, SessionState::Committed);
    assert_eq!(
        sessions[0].params.target,
        Some(InstalledVersion {
            code: 8,
            label: "2.3.0".to_string()
        })
    );
}

#[tokio::test]
async fn test_checksum_mismatch_discards_artifact() {
    let (base, _) = serve_feed("v2.3.0", Some("0".repeat(64))).await;
    let device = Device::new(&base);
    let coordinator = device.coordinator(vec![wifi()], "2.1.0");

    let UpdateOutcome::Available(descriptor) = coordinator.check().await else {
        panic!("expected an available update");
    };
    assert!(!coordinator.apply(&descriptor).await);

    let updates = device.config.storage.updates_dir();
    assert!(!updates.join("temp.apk").exists());
    assert!(!updates.join("v8.apk").exists());
    assert!(coordinator.store().list().is_empty());
    assert!(device.spool().list().is_empty());

    let downloader = ArtifactDownloader::new(device.config.release.clone(), &updates);
    let err = downloader
        .fetch_and_verify(&wifi(), &descriptor)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Integrity { .. }));
    assert!(!downloader.staging_path().exists());
}

#[tokio::test]
async fn test_manifest_without_digest_skips_verification() {
    let (base, _) = serve_feed("v2.3.0", Some("checksums to follow\n".to_string())).await;
    let device = Device::new(&base);
    let coordinator = device.coordinator(vec![wifi()], "2.1.0");

    let UpdateOutcome::Available(descriptor) = coordinator.check().await else {
        panic!("expected an available update");
    };
    assert!(descriptor.checksum_manifest_url.is_some());
    assert!(coordinator.apply(&descriptor).await);
    assert!(device.dir.path().join("updates").join("v8.apk").exists());
}

/// Feed that accepts connections but answers too slowly: the release JSON
/// never arrives and the artifact stalls after its first chunk.
async fn serve_stalled_feed() -> String {
    use axum::body::{Body, Bytes};
    use std::time::Duration;

    async fn slow_latest() -> &'static str {
        tokio::time::sleep(Duration::from_secs(30)).await;
        "{}"
    }

    async fn stalled_artifact() -> Body {
        let chunks = futures_util::stream::unfold(0u8, |sent| async move {
            if sent == 0 {
                Some((Ok::<_, std::io::Error>(Bytes::from_static(b"partial")), 1))
            } else {
                tokio::time::sleep(Duration::from_secs(30)).await;
                None
            }
        });
        Body::from_stream(chunks)
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/repos/imdtouch/JCI_Andriod12/releases/latest", get(slow_latest))
        .route("/dl/stalled.apk", get(stalled_artifact));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

#[tokio::test]
async fn test_slow_feed_is_a_timeout_not_missing_connectivity() {
    let base = serve_stalled_feed().await;
    let mut device = Device::new(&base);
    device.config.release.connect_timeout_secs = 1;
    device.config.release.read_timeout_secs = 1;

    let outcome = device.coordinator(vec![wifi()], "2.1.0").check().await;
    assert_eq!(outcome, UpdateOutcome::Failed("Connection timed out".to_string()));
}

#[tokio::test]
async fn test_stalled_download_times_out_and_leaves_nothing_staged() {
    let base = serve_stalled_feed().await;
    let mut device = Device::new(&base);
    device.config.release.connect_timeout_secs = 1;
    device.config.release.read_timeout_secs = 1;

    let descriptor = UpdateDescriptor {
        target_version_code: 8,
        version_label: "2.3.0".to_string(),
        artifact_url: format!("{}/dl/stalled.apk", base),
        checksum_manifest_url: None,
    };
    let coordinator = device.coordinator(vec![wifi()], "2.1.0");

    let err = coordinator.apply_detailed(&descriptor).await.unwrap_err();
    assert!(
        matches!(&err, UpdateError::TransientNetwork(m) if m == "Connection timed out"),
        "got {:?}",
        err
    );

    let updates = device.config.storage.updates_dir();
    assert!(!updates.join("temp.apk").exists());
    assert!(!updates.join("v8.apk").exists());
    assert!(coordinator.store().list().is_empty());
    assert!(device.spool().list().is_empty());
}
