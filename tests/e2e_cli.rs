//! CLI end-to-end tests
//!
//! Tests for the mediasqueeze command-line interface. None of these need
//! ffmpeg to be installed.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the mediasqueeze binary
#[allow(deprecated)]
fn mediasqueeze_cmd() -> Command {
    Command::cargo_bin("mediasqueeze").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    mediasqueeze_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    mediasqueeze_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mediasqueeze"));
}

#[test]
fn test_cli_profiles_lists_every_profile() {
    mediasqueeze_cmd()
        .arg("profiles")
        .assert()
        .success()
        .stdout(predicate::str::contains("audio-64k"))
        .stdout(predicate::str::contains("video-1080p"))
        .stdout(predicate::str::contains("Video 720p (mp4)"));
}

#[test]
fn test_cli_profiles_json() {
    let output = mediasqueeze_cmd()
        .args(["profiles", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let profiles = parsed.as_array().unwrap();
    assert_eq!(profiles.len(), 7);
    assert_eq!(profiles[0]["id"], "audio-64k");
    assert_eq!(profiles[0]["params"]["bitrate_kbps"], 64);
    assert_eq!(profiles[6]["params"]["height"], 1080);
}

#[test]
fn test_cli_check_tools_command() {
    mediasqueeze_cmd()
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"));
}

#[test]
fn test_cli_validate_default_config() {
    mediasqueeze_cmd()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("Selection window: 120s"));
}

#[test]
fn test_cli_validate_config_file_with_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{ "encoder": { "workers": 0 }, "session": { "conflict_policy": "supersede" } }"#,
    )
    .unwrap();

    mediasqueeze_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Supersede"))
        .stdout(predicate::str::contains("encoder.workers is 0"));
}

#[test]
fn test_cli_validate_rejects_bad_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();

    mediasqueeze_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("config parse error"));
}

#[test]
fn test_cli_compress_rejects_unknown_profile() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("song.mp3");
    fs::write(&input, b"not really audio").unwrap();

    mediasqueeze_cmd()
        .arg("compress")
        .arg(&input)
        .args(["--profile", "audio-9000k"])
        .arg("--out")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown profile id"));
}

#[test]
fn test_cli_compress_requires_files() {
    mediasqueeze_cmd()
        .args(["compress", "--profile", "audio-64k"])
        .assert()
        .failure();
}

/// A stand-in ffmpeg that writes a few bytes to its last argument.
#[cfg(unix)]
fn fake_ffmpeg(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    fs::write(
        &path,
        "#!/bin/sh\nfor arg; do last=$arg; done\nprintf encoded > \"${last#file:}\"\n",
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn test_cli_compress_continues_after_unoffered_profile() {
    let dir = tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path());
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        serde_json::json!({
            "storage": { "root": dir.path().join("scratch") },
            "encoder": { "ffmpeg_path": ffmpeg },
        })
        .to_string(),
    )
    .unwrap();

    let clip = dir.path().join("clip.mp4");
    let song = dir.path().join("song.mp3");
    fs::write(&clip, b"video").unwrap();
    fs::write(&song, b"audio").unwrap();
    let out = dir.path().join("out");

    mediasqueeze_cmd()
        .arg("-c")
        .arg(&config)
        .arg("compress")
        .arg(&clip)
        .arg(&song)
        .args(["--profile", "audio-64k"])
        .arg("--out")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("clip.mp4"))
        .stderr(predicate::str::contains("CancelledError"))
        .stderr(predicate::str::contains("1 of 2 submissions failed"))
        .stdout(predicate::str::contains("song.mp3"));

    assert_eq!(fs::read(out.join("compressed_song.mp3")).unwrap(), b"encoded");
    assert!(!out.join("compressed_clip.mp3").exists());
}

