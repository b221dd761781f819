//! The worker binary on its own, without a host.

use std::process::{Command, Stdio};

#[test]
fn missing_config_file_is_reported_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_keepsake-worker"))
        .arg("--archive-dir")
        .arg(dir.path())
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config file not found"), "stderr: {stderr}");
    assert!(output.stdout.is_empty(), "stdout carries protocol only");
}

#[test]
fn end_of_input_exits_cleanly_and_prepares_archive() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_keepsake-worker"))
        .arg("--archive-dir")
        .arg(dir.path())
        .env("KEEPSAKE_LOG", "error")
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert!(dir.path().join("thumbs").is_dir());
}
