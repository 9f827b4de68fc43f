use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_config_path_command() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("authsync")
        .env("AUTHSYNC_HOME", dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_creates_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");

    cargo_bin_cmd!("authsync")
        .env("AUTHSYNC_HOME", dir.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config at"));

    let contents = fs::read_to_string(&config_path).unwrap();
    assert!(contents.contains("[provider]"));
    assert!(contents.contains("[redirect]"));
}

#[test]
fn test_config_init_fails_if_exists() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.toml"), "# existing config").unwrap();

    cargo_bin_cmd!("authsync")
        .env("AUTHSYNC_HOME", dir.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_set_provider_writes_config() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("authsync")
        .env("AUTHSYNC_HOME", dir.path())
        .args([
            "config",
            "set-provider",
            "--url",
            "https://project.supabase.co",
            "--anon-key",
            "anon-123",
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(contents.contains("url = \"https://project.supabase.co\""));
    assert!(contents.contains("anon_key = \"anon-123\""));
}

#[test]
fn test_auth_command_without_provider_fails() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("authsync")
        .env("AUTHSYNC_HOME", dir.path())
        .env_remove("AUTHSYNC_PROVIDER_URL")
        .env_remove("AUTHSYNC_ANON_KEY")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No provider URL configured"));
}
