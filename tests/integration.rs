//! End-to-end CLI tests. Scenarios that require a live minikube cluster
//! and `kubectl`/`kustomize` on PATH are exercised at the module level in
//! `src/reconciler.rs`/`src/resource.rs` instead — these only check the
//! CLI surface this crate owns directly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn devexy_cmd() -> Command {
    Command::cargo_bin("devexy").unwrap()
}

fn isolated_home() -> TempDir {
    TempDir::new().unwrap()
}

#[test]
fn version_prints_package_version() {
    devexy_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn logs_with_no_history_prints_nothing_and_succeeds() {
    let home = isolated_home();
    devexy_cmd()
        .env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path())
        .arg("logs")
        .assert()
        .success();
}

#[test]
fn logs_tails_last_n_lines() {
    let home = isolated_home();
    let app_dir = home.path().join(".local/share/devexy");
    fs::create_dir_all(&app_dir).unwrap();
    let log_contents: String = (0..20).map(|i| format!("line {i}\n")).collect();
    fs::write(app_dir.join("app.log"), log_contents).unwrap();

    devexy_cmd()
        .env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join(".local/share"))
        .arg("logs")
        .arg("--lines")
        .arg("3")
        .assert()
        .success()
        .stdout(predicate::str::contains("line 19"))
        .stdout(predicate::str::contains("line 17"))
        .stdout(predicate::str::contains("line 16").not());
}

#[test]
fn mk_start_fails_cleanly_without_minikube_on_path() {
    let home = isolated_home();
    devexy_cmd()
        .env("HOME", home.path())
        .env("PATH", "/nonexistent")
        .arg("mk")
        .arg("start")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    devexy_cmd().arg("bogus-verb").assert().failure();
}
