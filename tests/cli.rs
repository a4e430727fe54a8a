//! CLI integration tests for deckhand.
//!
//! Each test uses an isolated temp directory, so tests can run in parallel.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use deckhand::store::{SqliteStore, Store};
use predicates::prelude::*;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir_str(&self) -> String {
        self.temp_dir.path().join("data").to_string_lossy().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("deckhand").expect("failed to find binary");
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("DECKHAND_GITHUB_TOKEN");
        cmd
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["init", "--data-dir", &self.data_dir_str()])
            .assert()
    }

    fn write_config(&self, body: &str) -> String {
        let file = self.temp_dir.child("deckhand.toml");
        file.write_str(body).expect("failed to write config");
        file.path().to_string_lossy().to_string()
    }
}

#[test]
fn test_init_creates_database() {
    let ctx = TestContext::new();

    ctx.init()
        .success()
        .stdout(predicate::str::contains("Initialized database"));

    ctx.temp_dir
        .child("data/deckhand.db")
        .assert(predicate::path::exists());

    let store = SqliteStore::new(ctx.temp_dir.path().join("data/deckhand.db")).unwrap();
    assert!(store.latest_sync_run("acme/shop").unwrap().is_none());
}

#[test]
fn test_init_is_idempotent() {
    let ctx = TestContext::new();

    ctx.init().success();
    ctx.init().success();
}

#[test]
fn test_sync_requires_initialized_database() {
    let ctx = TestContext::new();
    let config = ctx.write_config(&format!("data_dir = {:?}\n", ctx.data_dir_str()));

    ctx.cmd()
        .args(["sync", "acme/shop", "--config", &config])
        .assert()
        .failure()
        .stderr(predicate::str::contains("deckhand init"));
}

#[test]
fn test_sync_rejects_invalid_config() {
    let ctx = TestContext::new();
    let config = ctx.write_config("[sync]\ntimeframe_days = 0\n");

    ctx.cmd()
        .args(["sync", "acme/shop", "--config", &config])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeframe_days"));
}

#[test]
fn test_serve_fails_without_config_file() {
    let ctx = TestContext::new();
    let missing = ctx.temp_dir.path().join("missing.toml");

    ctx.cmd()
        .args(["serve", "--config", &missing.to_string_lossy()])
        .assert()
        .failure();
}
