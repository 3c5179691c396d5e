use assert_cmd::prelude::*;
use predicates::str::contains;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn triekv() -> Command {
    let mut cmd = Command::cargo_bin("triekv").unwrap();
    cmd.env("RUST_LOG", "off");
    cmd
}

fn init(path: &Path) {
    triekv()
        .arg("init")
        .arg("--path").arg(path)
        .arg("-w").arg("2")
        .arg("-w").arg("2")
        .arg("--charset").arg("hex")
        .assert()
        .success()
        .stdout(contains("Storage initialized successfully"));
}

#[test]
fn put_get_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    init(temp_dir.path());

    triekv()
        .arg("put").arg("abcd0001").arg("hello")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .success()
        .stdout(contains("Put key: abcd0001"));

    triekv()
        .arg("get").arg("abcd0001")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .success()
        .stdout(contains("hello"));

    triekv()
        .arg("get").arg("abcd0002")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .success()
        .stdout(contains("Key not found"));
}

#[test]
fn list_and_delete() {
    let temp_dir = TempDir::new().unwrap();
    init(temp_dir.path());

    for (key, value) in [("abcd0001", "one"), ("abcd0002", "two"), ("ef010001", "three")] {
        triekv()
            .arg("put").arg(key).arg(value)
            .arg("--path").arg(temp_dir.path())
            .assert()
            .success();
    }

    triekv()
        .arg("list").arg("--value")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .success()
        .stdout(contains("abcd0002\ttwo"))
        .stdout(contains("ef010001\tthree"));

    triekv()
        .arg("delete").arg("abcd0001")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .success()
        .stdout(contains("Deleted key: abcd0001"));

    triekv()
        .arg("list").arg("--count")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .success()
        .stdout(contains("2"));
}

#[test]
fn invalid_key_fails() {
    let temp_dir = TempDir::new().unwrap();
    init(temp_dir.path());

    triekv()
        .arg("put").arg("not-hex!").arg("value")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .failure();
}

#[test]
fn uninitialized_store_fails() {
    let temp_dir = TempDir::new().unwrap();

    triekv()
        .arg("get").arg("abcd0001")
        .arg("--path").arg(temp_dir.path())
        .assert()
        .failure();
}
