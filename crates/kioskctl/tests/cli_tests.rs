//! CLI integration tests for kioskctl
//!
//! Each test points the binary at its own config file and data directory:
//! - kioskctl versions          picker with (current) marker
//! - kioskctl rollback CODE     commits a session to the spool
//! - kioskctl status            installed version, spool counts
//! - kioskctl config            effective TOML

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn kioskctl(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kioskctl"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("KIOSK_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run kioskctl")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

/// Data dir with v3 and v5 retained, installed version 5
fn device(extra: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let updates = data.join("updates");
    fs::create_dir_all(&updates).unwrap();

    for code in [3, 5] {
        fs::write(updates.join(format!("v{}.apk", code)), format!("apk {}", code)).unwrap();
    }
    fs::write(
        updates.join("versions.json"),
        r#"[
  {"code": 5, "name": "1.5.0", "file": "v5.apk", "date": 1700000000000},
  {"code": 3, "name": "1.3.0", "file": "v3.apk", "date": 1690000000000}
]"#,
    )
    .unwrap();

    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        format!(
            "[storage]\ndata_dir = \"{}\"\n\n[app]\nversion_label = \"1.5.0\"\nversion_code = 5\n{}",
            data.display(),
            extra
        ),
    )
    .unwrap();

    (dir, config)
}

fn session_count(dir: &TempDir) -> usize {
    fs::read_dir(dir.path().join("data/sessions"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[test]
fn test_help_lists_commands() {
    let out = Command::new(env!("CARGO_BIN_EXE_kioskctl"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(out.status.success());
    let text = stdout(&out);
    for cmd in ["check", "apply", "rollback", "versions", "status", "config"] {
        assert!(text.contains(cmd), "missing {} in help", cmd);
    }
}

#[test]
fn test_versions_marks_current() {
    let (_dir, config) = device("");
    let out = kioskctl(&config, &["versions"]);
    assert!(out.status.success());

    let text = stdout(&out);
    let current = text.lines().find(|l| l.contains("1.5.0")).unwrap();
    assert!(current.contains("(current)"));
    let older = text.lines().find(|l| l.contains("1.3.0")).unwrap();
    assert!(!older.contains("(current)"));
}

#[test]
fn test_versions_empty_store() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        format!("[storage]\ndata_dir = \"{}\"\n", dir.path().join("data").display()),
    )
    .unwrap();

    let out = kioskctl(&config, &["versions"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("No previous versions available"));
}

#[test]
fn test_rollback_commits_session() {
    let (dir, config) = device("");
    let out = kioskctl(&config, &["rollback", "3", "--yes"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let text = stdout(&out);
    assert!(text.contains("Rollback to 1.3.0 (v3)"));
    assert!(text.contains("Downgrade allowed"));
    assert_eq!(session_count(&dir), 1);
}

#[test]
fn test_rollback_unknown_code_fails() {
    let (dir, config) = device("");
    let out = kioskctl(&config, &["rollback", "9", "--yes"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Version 9 is not stored on this device"));
    assert_eq!(session_count(&dir), 0);
}

#[test]
fn test_rollback_to_current_is_refused() {
    let (dir, config) = device("");
    let out = kioskctl(&config, &["rollback", "5", "--yes"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Already running this version"));
    assert_eq!(session_count(&dir), 0);
}

#[test]
fn test_status_reports_spool() {
    let (_dir, config) = device("");
    assert!(kioskctl(&config, &["rollback", "3", "--yes"]).status.success());

    let out = kioskctl(&config, &["status"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("1.5.0 (v5)"));
    assert!(text.contains("2 of 10"));
    let committed = text.lines().find(|l| l.contains("committed:")).unwrap();
    assert!(committed.trim().ends_with('1'));
}

#[test]
fn test_config_shows_effective_values() {
    let (_dir, config) = device("");
    let out = kioskctl(&config, &["config"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("[release]"));
    assert!(text.contains("version_code = 5"));
    assert!(text.contains("checksums.txt"));

    let defaults = stdout(&kioskctl(&config, &["config", "--defaults"]));
    assert!(defaults.contains("version_code = 1"));
}

#[test]
fn test_verbose_logs_progress_to_stderr() {
    let (_dir, config) = device("");
    let quiet = kioskctl(&config, &["rollback", "3", "--yes"]);
    assert!(!stderr(&quiet).contains("Rolling back from v5 to v3"));

    let (_dir, config) = device("");
    let out = kioskctl(&config, &["-v", "rollback", "3", "--yes"]);
    assert!(out.status.success());
    assert!(stderr(&out).contains("Rolling back from v5 to v3"));
}
