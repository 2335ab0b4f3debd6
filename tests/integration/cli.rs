#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::Command;
use common::build_stack;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn check_accepts_a_valid_document() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());

    Command::new(assert_cmd::cargo::cargo_bin!("servstack"))
        .arg("check")
        .arg("--config")
        .arg(&stack.document_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration document is valid"))
        .stdout(predicate::str::contains("mysql:  version 8.0.35"));
}

#[test]
fn check_rejects_a_corrupted_document() {
    let temp = tempdir().expect("failed to create tempdir");
    let document_path = temp.path().join("config.json");
    fs::write(&document_path, "{ not json").unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("servstack"))
        .arg("check")
        .arg("--config")
        .arg(&document_path)
        .assert()
        .failure();
}

#[test]
fn check_rejects_a_document_with_missing_sections() {
    let temp = tempdir().expect("failed to create tempdir");
    let document_path = temp.path().join("config.json");
    fs::write(&document_path, r#"{ "servers": {} }"#).unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("servstack"))
        .arg("check")
        .arg("--config")
        .arg(&document_path)
        .assert()
        .failure();
}

#[test]
fn check_reports_a_missing_document() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("servstack"))
        .arg("check")
        .arg("--config")
        .arg(temp.path().join("nonexistent.json"))
        .assert()
        .failure();
}

#[test]
fn run_fails_fast_on_an_invalid_document() {
    let temp = tempdir().expect("failed to create tempdir");
    let document_path = temp.path().join("config.json");
    fs::write(&document_path, r#"{ "servers": {} }"#).unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("servstack"))
        .arg("run")
        .arg("--config")
        .arg(&document_path)
        .arg("--app-root")
        .arg(temp.path())
        .assert()
        .failure();
}
