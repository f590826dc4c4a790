// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use yare::parameterized;

use super::*;

fn config_in(dir: &Path, name: &str) -> Config {
    Config::with_dirs(name, dir.join("state"), dir.join("sock")).unwrap()
}

#[test]
fn paths_are_derived_from_the_instance_name() {
    let config = Config::with_dirs(
        "alpha",
        PathBuf::from("/var/state/dlock"),
        PathBuf::from("/tmp/dlock"),
    )
    .unwrap();

    assert_eq!(config.socket_path, PathBuf::from("/tmp/dlock/alpha.sock"));
    assert_eq!(
        config.lock_path,
        PathBuf::from("/var/state/dlock/alpha/daemon.pid")
    );
    assert_eq!(
        config.version_path,
        PathBuf::from("/var/state/dlock/alpha/daemon.version")
    );
    assert_eq!(
        config.log_path,
        PathBuf::from("/var/state/dlock/alpha/daemon.log")
    );
}

#[parameterized(
    empty = { "" },
    parent_dir = { ".." },
    path_separator = { "a/b" },
    whitespace = { "a b" },
)]
fn invalid_instance_names_are_rejected(name: &str) {
    let result = Config::with_dirs(name, PathBuf::from("/s"), PathBuf::from("/t"));
    assert!(matches!(result, Err(LifecycleError::InvalidName(_))));
}

#[tokio::test]
async fn startup_creates_files_and_shutdown_removes_them() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "default");

    let mut daemon = startup(&config).unwrap();
    assert!(config.socket_path.exists());
    assert!(config.version_path.exists());
    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());

    daemon.shutdown().unwrap();
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
    assert!(!config.version_path.exists());
}

#[tokio::test]
async fn second_daemon_for_the_same_name_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "default");

    let _first = startup(&config).unwrap();
    let second = startup(&config);

    assert!(matches!(second, Err(LifecycleError::LockFailed(_))));
    // The running daemon's files survive the failed attempt
    assert!(config.socket_path.exists());
    assert!(config.lock_path.exists());
}

#[tokio::test]
async fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "default");
    std::fs::create_dir_all(config.socket_path.parent().unwrap()).unwrap();
    std::fs::write(&config.socket_path, b"stale").unwrap();

    let mut daemon = startup(&config).unwrap();
    assert!(daemon.take_listener().is_some());
    assert!(daemon.take_listener().is_none());
}

#[test]
fn startup_attempts_are_marked_in_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "logged");

    config.mark_startup(41).unwrap();
    config.mark_startup(42).unwrap();
    config.record_startup_failure(&LifecycleError::NoStateDir);

    let log = std::fs::read_to_string(&config.log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(
        lines,
        vec![
            format!("{}41)", STARTUP_MARKER_PREFIX),
            format!("{}42)", STARTUP_MARKER_PREFIX),
            "ERROR Failed to start daemon: Could not determine state directory".to_string(),
        ]
    );
}

#[test]
fn log_writer_appends_after_the_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "logged");
    config.mark_startup(7).unwrap();

    let (mut writer, guard) = config.log_writer().unwrap();
    writer.write_all(b"INFO dlockd: ready\n").unwrap();
    drop(guard);

    let log = std::fs::read_to_string(&config.log_path).unwrap();
    assert_eq!(
        log,
        format!("{}7)\nINFO dlockd: ready\n", STARTUP_MARKER_PREFIX)
    );
}
