//! CLI smoke tests: argument surface and exit codes that do not need a
//! provider.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_commands() {
    Command::cargo_bin("maestro")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("execute"))
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("resume"));
}

#[test]
fn models_lists_default_catalog() {
    Command::cargo_bin("maestro")
        .unwrap()
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("tools=true"));
}

#[test]
fn bad_config_path_exits_with_config_code() {
    Command::cargo_bin("maestro")
        .unwrap()
        .args(["--config", "/nonexistent/maestro.toml", "models"])
        .assert()
        .code(2);
}

#[test]
fn missing_subcommand_fails() {
    Command::cargo_bin("maestro").unwrap().assert().failure();
}
