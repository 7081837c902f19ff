use std::path::Path;

use assert_cmd::Command;
use tempfile::tempdir;

fn acta(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("acta").unwrap();
    cmd.env_remove("ACTA_DB")
        .env("ACTA_LOG", "off")
        .arg("--db")
        .arg(db);
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn migrate_then_status_reports_applied() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("acta.sqlite3");

    let out = stdout_of(acta(&db).args(["db", "migrate"]));
    assert!(out.contains("migrations applied"));

    let out = stdout_of(acta(&db).args(["db", "status"]));
    assert!(out.contains("202610010900_initial.sql"));
    assert!(!out.contains("pending"));
}

#[test]
fn status_on_fresh_database_exits_with_pending() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("fresh.sqlite3");

    acta(&db)
        .args(["db", "status"])
        .assert()
        .code(2);
}

#[test]
fn users_seed_and_calculate() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("acta.sqlite3");

    let out = stdout_of(acta(&db).args([
        "users",
        "create",
        "--email",
        "Ana@Example.com",
        "--first-name",
        "Ana",
    ]));
    assert!(out.contains("ana@example.com"));

    let out = stdout_of(acta(&db).args(["users", "list"]));
    assert!(out.contains("ana@example.com"));

    let out = stdout_of(acta(&db).args(["categories", "seed-defaults"]));
    assert!(out.contains("5 default categories created"));
    let out = stdout_of(acta(&db).args(["categories", "seed-defaults", "--user", "ana@example.com"]));
    assert!(out.contains("0 default categories created"));

    let out = stdout_of(acta(&db).args([
        "analytics",
        "calculate",
        "--date",
        "2024-03-06",
        "--days",
        "3",
        "--weekly",
    ]));
    assert!(out.contains("Calculating analytics for 1 users"));
    assert!(out.contains("3 daily rollups (2024-03-04 to 2024-03-06)"));
    assert!(out.contains("week 10 of 2024"));
}

#[test]
fn calculate_for_unknown_user_fails() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("acta.sqlite3");

    acta(&db)
        .args(["analytics", "calculate", "--user", "nobody@example.com"])
        .assert()
        .failure();
}

#[test]
fn cleanup_requires_confirmation() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("acta.sqlite3");

    let out = stdout_of(acta(&db).args(["analytics", "cleanup"]));
    assert!(out.contains("Nothing deleted"));

    let out = stdout_of(acta(&db).args(["analytics", "cleanup", "--dry-run"]));
    assert!(out.contains("Would delete 0 daily rollups"));

    let out = stdout_of(acta(&db).args(["analytics", "cleanup", "--confirm", "--days", "30"]));
    assert!(out.starts_with("Deleted 0 daily rollups"));
}
