//! Integration tests for the aura-risk CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn aura_cmd() -> Command {
    Command::cargo_bin("aura-risk").unwrap()
}

fn feature_table_json(users: usize) -> String {
    let rows: Vec<serde_json::Value> = (0..users)
        .map(|i| {
            let x = i as f64;
            serde_json::json!({
                "user_id": format!("user-{i:03}"),
                "username": format!("name {i}"),
                "real_friends": (x * 7.0) % 31.0,
                "active_conversations": (x * 3.0) % 11.0,
                "inactivity_days": (x * 5.0) % 17.0,
                "mean_engagement": (x * 11.0) % 19.0,
                "reciprocity_ratio": ((x * 2.0) % 7.0) / 7.0,
                "mean_sentiment": null,
            })
        })
        .collect();
    serde_json::to_string(&rows).unwrap()
}

#[test]
fn help_lists_commands() {
    aura_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("score"))
        .stdout(predicate::str::contains("print-default-config"))
        .stdout(predicate::str::contains("validate-config"));
}

#[test]
fn version_flag() {
    aura_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn print_default_config_is_valid_yaml() {
    let output = aura_cmd().arg("print-default-config").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("seed: 42"));
    assert!(stdout.contains("failed_voters"));
}

#[test]
fn validate_config_accepts_defaults_and_rejects_bad_weights() {
    let dir = tempdir().unwrap();

    let good = dir.path().join("good.yml");
    fs::write(&good, "seed: 3\n").unwrap();
    aura_cmd()
        .args(["validate-config", "--config"])
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file is valid"));

    let bad = dir.path().join("bad.yml");
    fs::write(
        &bad,
        "ensemble:\n  severity:\n    weights:\n      partition: 0.3\n      isolation: 0.3\n      mixture: 0.3\n",
    )
    .unwrap();
    aura_cmd()
        .args(["validate-config", "--config"])
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("must sum to 1.0"));
}

#[test]
fn score_prints_summary_and_writes_results() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("users.json");
    let out = dir.path().join("results.json");
    fs::write(&input, feature_table_json(40)).unwrap();

    aura_cmd()
        .arg("score")
        .arg(&input)
        .arg("--out")
        .arg(&out)
        .args(["--top", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Risk tier distribution"))
        .stdout(predicate::str::contains("contributing estimators"));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(written["rows"].as_array().map(Vec::len), Some(40));
    assert_eq!(written["metadata"]["n_users"], 40);
}

#[test]
fn score_rejects_missing_input() {
    aura_cmd()
        .args(["score", "/definitely/not/here.json"])
        .assert()
        .failure();
}

#[test]
fn score_rejects_unknown_tier() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("users.json");
    fs::write(&input, feature_table_json(10)).unwrap();

    aura_cmd()
        .arg("score")
        .arg(&input)
        .args(["--tier", "severe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown risk tier"));
}
