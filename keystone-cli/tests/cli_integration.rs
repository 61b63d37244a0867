//! CLI integration tests for keystone-cli.
//!
//! These tests run the actual binary and check outputs and exit codes. None of them
//! need a database.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a Command for the keystone binary with a clean table environment.
fn keystone() -> Command {
    let mut cmd = Command::cargo_bin("keystone").unwrap();
    for var in [
        "DATABASE_URL",
        "KEYSTONE_TABLE_PREFIX",
        "KEYSTONE_ENVIRONMENT",
        "KEYSTONE_TABLE_CEREMONIES",
        "KEYSTONE_TABLE_CREDENTIALS",
        "KEYSTONE_TABLE_USERS",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_lists_commands() {
    keystone()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("ensure-tables"))
        .stdout(predicate::str::contains("verify-schema"));
}

#[test]
fn test_help_shows_exit_codes() {
    keystone()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("65"))
        .stdout(predicate::str::contains("69"));
}

#[test]
fn test_version_displays_version() {
    keystone()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("keystone"));
}

// ============================================================================
// Resolve Tests
// ============================================================================

#[test]
fn test_resolve_uses_naming_convention() {
    keystone()
        .arg("resolve")
        .env("KEYSTONE_TABLE_PREFIX", "acme")
        .env("KEYSTONE_ENVIRONMENT", "staging")
        .assert()
        .success()
        .stdout(predicate::str::contains("acme-ceremonies-staging"))
        .stdout(predicate::str::contains("acme-credentials-staging"))
        .stdout(predicate::str::contains("acme-users-staging"))
        .stdout(predicate::str::contains("All tables resolved"));
}

#[test]
fn test_resolve_applies_override() {
    keystone()
        .args(["resolve", "--quiet"])
        .env("KEYSTONE_TABLE_USERS", "legacy-users")
        .assert()
        .success()
        .stdout(predicate::str::contains("legacy-users"))
        .stdout(predicate::str::contains("keystone-ceremonies-dev"))
        .stdout(predicate::str::contains("All tables resolved").not());
}

// ============================================================================
// Database Command Tests
// ============================================================================

#[test]
fn test_migrate_requires_database_url() {
    keystone()
        .arg("migrate")
        .assert()
        .code(64)
        .stderr(predicate::str::contains("database URL is required"));
}

#[test]
fn test_verify_schema_requires_database_url() {
    keystone().arg("verify-schema").assert().code(64);
}
