use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args(["loans", "--db-path", "some_db"]);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."));
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_originate_falls_back_to_memory() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args([
        "originate",
        "--db-path",
        "some_db",
        "--amount",
        "30000",
        "--term",
        "12",
    ]);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING"))
        .stdout(predicate::str::contains("ACTIVE"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.arg("loans").arg("--db-path").arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING").not());
}
