//! CLI behaviour that needs no database.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn tally() -> Command {
    let mut cmd = Command::cargo_bin("tally").expect("tally binary");
    cmd.env_remove(tally_db::ENV_DB_URL);
    cmd
}

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    f.write_all(contents.as_bytes()).expect("write yaml");
    f
}

#[test]
fn config_hash_is_independent_of_key_order() {
    let a = yaml_file("series:\n  orders:\n    prefix: SAFT-\n    pad_width: 5\nallocator:\n  max_attempts: 3\n");
    let b = yaml_file("allocator:\n  max_attempts: 3\nseries:\n  orders:\n    pad_width: 5\n    prefix: SAFT-\n");

    let out_a = tally().arg("config-hash").arg(a.path()).output().expect("run a");
    let out_b = tally().arg("config-hash").arg(b.path()).output().expect("run b");

    assert!(out_a.status.success());
    let first_line = |o: &std::process::Output| {
        String::from_utf8_lossy(&o.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    };
    assert!(first_line(&out_a).starts_with("config_hash="));
    assert_eq!(first_line(&out_a), first_line(&out_b));
}

#[test]
fn later_layers_override_earlier_ones() {
    let base = yaml_file("allocator:\n  max_attempts: 10\n");
    let site = yaml_file("allocator:\n  max_attempts: 4\n");

    tally()
        .arg("config-hash")
        .arg(base.path())
        .arg(site.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""max_attempts":4"#));
}

#[test]
fn config_with_connection_string_is_refused() {
    let f = yaml_file("database:\n  url: postgres://app:hunter2@db/tally\n");

    tally()
        .arg("config-hash")
        .arg(f.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("hunter2").not());
}

#[test]
fn unknown_series_fails_before_connecting() {
    tally()
        .args(["seq", "allocate", "--series", "quotes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("series not configured: quotes"));
}

#[test]
fn allocate_without_database_url_reports_missing_env() {
    tally()
        .args(["seq", "allocate", "--series", "orders"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TALLY_DATABASE_URL"));
}

#[test]
fn malformed_aggregate_id_is_rejected() {
    tally()
        .args(["reconcile", "one", "--aggregate-id", "not-a-uuid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid aggregate_id uuid"));
}
