//! Command-line tests that need no serial hardware

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// 2024-03-01 08:00:00 UTC
const DAY1_8AM: i64 = 1_709_280_000;
const DAY: i64 = 86_400;

fn write_ledger(dir: &TempDir) -> std::path::PathBuf {
    let lines = [
        // 360 s per piece
        format!("{} {} panel 10 1500000 2500000 500 BOB", DAY1_8AM, DAY1_8AM + 3600),
        // 10 s per piece: a dry run, excluded from the daily report
        format!("{} {} panel 10 1500000 2500000 500 BOB", DAY1_8AM + 3600, DAY1_8AM + 3700),
        format!("{} {} door 5 1500000 2500000 500", DAY1_8AM + DAY, DAY1_8AM + DAY + 1800),
        "garbage line".to_string(),
    ];
    let path = dir.path().join("stat.txt");
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

fn grbl_stream(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("grbl-stream").unwrap();
    cmd.env("GRBL_STREAM_CONFIG", dir.path().join("config.toml"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_report_totals_and_days() {
    let dir = TempDir::new().unwrap();
    let ledger = write_ledger(&dir);

    grbl_stream(&dir)
        .args(["report", "--utc"])
        .arg(&ledger)
        .assert()
        .success()
        .stdout(predicate::str::contains("Hours of operation:   1 h"))
        .stdout(predicate::str::contains("Pieces produced:      25"))
        .stdout(predicate::str::contains("X travel:             4500 m"))
        .stdout(predicate::str::contains("Mean laser power:     50 %"))
        .stdout(predicate::str::contains("2024-03-01  BOB panel: 10"))
        .stdout(predicate::str::contains("2024-03-02  --- door: 5"));
}

#[test]
fn test_report_json() {
    let dir = TempDir::new().unwrap();
    let ledger = write_ledger(&dir);

    let output = grbl_stream(&dir)
        .args(["report", "--utc", "--json"])
        .arg(&ledger)
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["totals"]["records"], 3);
    assert_eq!(value["totals"]["pieces"], 25);
    assert_eq!(value["days"].as_array().unwrap().len(), 2);
    assert_eq!(value["days"][0]["pieces"][0]["operator"], "BOB");
    assert!(value["days"][1]["pieces"][0]["operator"].is_null());
}

#[test]
fn test_report_min_seconds_threshold() {
    let dir = TempDir::new().unwrap();
    let ledger = write_ledger(&dir);

    // the 10 s/piece run now counts too
    grbl_stream(&dir)
        .args(["report", "--utc", "--min-seconds", "5"])
        .arg(&ledger)
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-03-01  BOB panel: 20"));
}

#[test]
fn test_report_missing_ledger_fails() {
    let dir = TempDir::new().unwrap();

    grbl_stream(&dir)
        .args(["report"])
        .arg(dir.path().join("nope.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_set_get_and_default_ledger() {
    let dir = TempDir::new().unwrap();
    let ledger = write_ledger(&dir);

    grbl_stream(&dir)
        .args(["config", "set", "--port", "/dev/ttyACM0", "--ledger"])
        .arg(&ledger)
        .assert()
        .success();

    grbl_stream(&dir)
        .args(["config", "get", "port"])
        .assert()
        .success()
        .stdout("/dev/ttyACM0\n");

    grbl_stream(&dir)
        .args(["config", "get", "baud"])
        .assert()
        .success()
        .stdout("(unset)\n");

    // report falls back to the configured ledger
    grbl_stream(&dir)
        .args(["report", "--utc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pieces produced:      25"));
}

#[test]
fn test_config_rejects_short_interval() {
    let dir = TempDir::new().unwrap();

    grbl_stream(&dir)
        .args(["config", "set", "--report-interval", "0.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 0.2"));
}

#[test]
fn test_stream_rejects_invalid_laser_before_connecting() {
    let dir = TempDir::new().unwrap();
    let program = dir.path().join("cut.nc");
    fs::write(&program, "G90\nG1 X10 S500\n").unwrap();

    grbl_stream(&dir)
        .args(["stream", "--anonymous", "--laser", "150", "--port", "/dev/does-not-exist"])
        .arg(&program)
        .assert()
        .failure()
        .stderr(predicate::str::contains("outside 1..=100"));
}

#[test]
fn test_stream_missing_file() {
    let dir = TempDir::new().unwrap();

    grbl_stream(&dir)
        .args(["stream", "--anonymous"])
        .arg(dir.path().join("missing.nc"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
