//! Smoke tests to verify command wiring

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("agegate").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("seed"));
}

#[test]
fn test_serve_help() {
    let mut cmd = Command::cargo_bin("agegate").unwrap();
    cmd.arg("serve").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Port to listen on"))
        .stdout(predicate::str::contains("--in-memory"));
}

#[test]
fn test_seed_help() {
    let mut cmd = Command::cargo_bin("agegate").unwrap();
    cmd.arg("seed").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_unknown_environment_fails() {
    let mut cmd = Command::cargo_bin("agegate").unwrap();
    cmd.env("APP_ENV", "staging").arg("seed");

    cmd.assert().failure();
}

#[test]
fn test_unknown_subcommand_fails() {
    let mut cmd = Command::cargo_bin("agegate").unwrap();
    cmd.arg("frobnicate");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
