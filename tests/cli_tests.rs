//! End-to-end tests of the `strata` binary

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn strata(root: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("strata").expect("binary builds");
    cmd.arg("--root").arg(root);
    cmd
}

#[test]
fn test_ls_lists_root_with_directory_suffix() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .arg("ls")
        .assert()
        .success()
        .stdout("a/\nblob.bin\nnotes.txt\n");
}

#[test]
fn test_ls_nested_directory() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["ls", "/a/b"])
        .assert()
        .success()
        .stdout("deep.txt\n");
}

#[test]
fn test_cat_prints_file_contents() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["cat", "notes.txt"])
        .assert()
        .success()
        .stdout("hello strata\n");
}

#[test]
fn test_cat_in_small_chunks_is_complete() {
    let temp_dir = common::sample_tree();
    let output = strata(temp_dir.path())
        .args(["--read-max", "7", "cat", "blob.bin"])
        .output()
        .expect("runs");
    assert!(output.status.success());
    assert_eq!(output.stdout, common::blob());
}

#[test]
fn test_cat_with_rule_override() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["--rule", "xyz=bin.r", "cat", "skipped.xyz"])
        .assert()
        .success()
        .stdout("?");
}

#[test]
fn test_cat_missing_file_fails() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["cat", "skipped.xyz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such file: skipped.xyz"));
}

#[test]
fn test_cat_directory_fails() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["cat", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not readable: a"));
}

#[test]
fn test_resolve_reports_partial_path() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["resolve", "a/b/c"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "a/b/c: unresolved at byte 4 (1 bytes remaining",
        ));
    strata(temp_dir.path())
        .args(["resolve", "/a/b/deep.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/a/b/deep.txt: resolved to file"));
}

#[test]
fn test_stats_flag_reports_counters() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["--stats", "cat", "notes.txt"])
        .assert()
        .success()
        .stderr(predicate::str::contains("opens: 1"));
}

#[test]
fn test_root_must_be_directory() {
    let temp_dir = common::sample_tree();
    strata(&temp_dir.path().join("notes.txt"))
        .arg("ls")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Root must be an existing directory"));
}

#[test]
fn test_quiet_and_verbose_conflict() {
    let temp_dir = common::sample_tree();
    strata(temp_dir.path())
        .args(["--quiet", "-v", "ls"])
        .assert()
        .failure();
}
