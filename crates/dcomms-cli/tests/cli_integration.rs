//! CLI Integration Tests
//!
//! Drive the `dcomms` binary end to end. Two data directories sharing a
//! hub directory and peer registry stand in for two parties.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A CLI command for party `who`, sharing hub and registry under `shared`
fn cli_cmd(shared: &TempDir, who: &str) -> Command {
    let root = shared.path();
    let mut cmd = Command::cargo_bin("dcomms").expect("Failed to find dcomms binary");
    cmd.arg("--data-dir")
        .arg(root.join(who))
        .arg("--hub-dir")
        .arg(root.join("hub"))
        .arg("--peer-registry")
        .arg(root.join("registry.db"));
    cmd
}

/// Extract the invite from `create` output ("  Invite: <code>")
fn extract_invite(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("  Invite: "))
        .map(|code| code.trim().to_string())
}

fn create_conversation(shared: &TempDir, who: &str, name: &str) -> String {
    let output = cli_cmd(shared, who)
        .args(["create", name])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    extract_invite(&String::from_utf8_lossy(&output)).expect("create prints an invite")
}

fn chat_file(shared: &TempDir, who: &str, name: &str) -> PathBuf {
    shared
        .path()
        .join(who)
        .join("chats")
        .join(format!("{}.chat", name))
}

// ============================================================================
// Conversation Lifecycle
// ============================================================================

#[test]
fn test_list_empty() {
    let shared = TempDir::new().unwrap();
    cli_cmd(&shared, "alice")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No conversations found."));
}

#[test]
fn test_create_and_list() {
    let shared = TempDir::new().unwrap();
    let invite = create_conversation(&shared, "alice", "lunch");
    assert_eq!(invite.len(), 64);
    assert!(chat_file(&shared, "alice", "lunch").exists());

    cli_cmd(&shared, "alice")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Conversations (1):"))
        .stdout(predicate::str::contains("  lunch"));
}

#[test]
fn test_create_duplicate_fails() {
    let shared = TempDir::new().unwrap();
    create_conversation(&shared, "alice", "lunch");

    cli_cmd(&shared, "alice")
        .args(["create", "lunch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_credentials_match_invite() {
    let shared = TempDir::new().unwrap();
    let invite = create_conversation(&shared, "alice", "lunch");

    cli_cmd(&shared, "alice")
        .args(["credentials", "lunch"])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", invite)));
}

#[test]
fn test_open_unknown_fails() {
    let shared = TempDir::new().unwrap();
    cli_cmd(&shared, "alice")
        .args(["open", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_delete_removes_file() {
    let shared = TempDir::new().unwrap();
    create_conversation(&shared, "alice", "lunch");

    cli_cmd(&shared, "alice")
        .args(["delete", "lunch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted conversation: lunch"));
    assert!(!chat_file(&shared, "alice", "lunch").exists());

    // Deleting again is fine
    cli_cmd(&shared, "alice")
        .args(["delete", "lunch"])
        .assert()
        .success();
}

#[test]
fn test_join_rejects_bad_invite() {
    let shared = TempDir::new().unwrap();
    cli_cmd(&shared, "bob")
        .args(["join", "lunch", "too-short"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid input"));
    assert!(!chat_file(&shared, "bob", "lunch").exists());
}

// ============================================================================
// Turn Taking
// ============================================================================

#[test]
fn test_two_party_exchange() {
    let shared = TempDir::new().unwrap();
    let invite = create_conversation(&shared, "alice", "lunch");

    cli_cmd(&shared, "bob")
        .args(["join", "lunch", &invite])
        .assert()
        .success()
        .stdout(predicate::str::contains("Role: joiner"))
        .stdout(predicate::str::contains("Turn: waiting for peer"));

    // The joiner cannot speak first
    cli_cmd(&shared, "bob")
        .args(["send", "lunch", "me first"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not your turn"));

    cli_cmd(&shared, "alice")
        .args(["send", "lunch", "noon?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Turn: waiting for peer"));

    cli_cmd(&shared, "alice").arg("sync").assert().success();
    cli_cmd(&shared, "bob")
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Synced: 1 new message(s)"));

    cli_cmd(&shared, "bob")
        .args(["messages", "lunch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[peer] noon?"));

    cli_cmd(&shared, "bob")
        .args(["send", "lunch", "sure"])
        .assert()
        .success();
    cli_cmd(&shared, "bob").arg("sync").assert().success();
    cli_cmd(&shared, "alice").arg("sync").assert().success();

    cli_cmd(&shared, "alice")
        .args(["messages", "lunch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[me] noon?"))
        .stdout(predicate::str::contains("[peer] sure"));
}

#[test]
fn test_send_empty_text_fails() {
    let shared = TempDir::new().unwrap();
    create_conversation(&shared, "alice", "lunch");
    cli_cmd(&shared, "alice")
        .args(["send", "lunch", "  "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be empty"));
}

// ============================================================================
// Peers and Status
// ============================================================================

#[test]
fn test_add_peer_and_probe() {
    let shared = TempDir::new().unwrap();
    cli_cmd(&shared, "alice")
        .args(["add-peer", "127.0.0.1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added peer: 127.0.0.1:1"));

    let registry = std::fs::read_to_string(shared.path().join("registry.db")).unwrap();
    assert!(registry.lines().any(|l| l == "127.0.0.1:1"));

    cli_cmd(&shared, "alice")
        .arg("peers")
        .assert()
        .success()
        .stdout(predicate::str::contains("127.0.0.1:1 unreachable (last seen: never)"));
}

#[test]
fn test_one_shot_runs_do_not_register() {
    let shared = TempDir::new().unwrap();
    create_conversation(&shared, "alice", "lunch");
    cli_cmd(&shared, "alice").arg("list").assert().success();
    cli_cmd(&shared, "alice").arg("status").assert().success();

    let registry = shared.path().join("registry.db");
    let content = std::fs::read_to_string(&registry).unwrap_or_default();
    assert!(content.is_empty(), "registry grew: {content:?}");
}

#[test]
fn test_verbose_flag_after_subcommand() {
    let shared = TempDir::new().unwrap();
    cli_cmd(&shared, "alice")
        .args(["list", "-v"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No conversations found."));
}

#[test]
fn test_status_is_json() {
    let shared = TempDir::new().unwrap();
    let output = cli_cmd(&shared, "alice")
        .arg("status")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let status: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(status["ready"], true);
    assert!(status["syncPort"].as_u64().is_some());
}

#[test]
fn test_config_file_is_honoured() {
    let shared = TempDir::new().unwrap();
    let data_dir = shared.path().join("alice");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("dcomms.json"), "{ not json").unwrap();

    cli_cmd(&shared, "alice")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
