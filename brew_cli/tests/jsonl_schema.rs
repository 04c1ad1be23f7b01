use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Validate the JSONL schema of a successful simulated brew.
#[rstest]
fn jsonl_brew_schema() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(
        &cfg,
        "[brew]\ntarget_weight_g = 250.0\n\n[simulation]\ninitial_weight_g = 229.0\n",
    )
    .unwrap();

    let out = Command::cargo_bin("coldbrew")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("brew")
        .arg("--fast")
        .arg("--status-every-s")
        .arg("300")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&out);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("not JSON ({e}): {l}")))
        .collect();

    let status: Vec<_> = lines.iter().filter(|v| v["event"] == "status").collect();
    assert!(!status.is_empty(), "no status lines in: {stdout}");
    assert!(status[0]["elapsed_s"].is_number());
    assert_eq!(status[0]["session"]["state"], "brewing");

    let last = lines.last().unwrap();
    assert_eq!(last["event"], "complete");
    let s = &last["session"];
    for key in [
        "id",
        "state",
        "strategy",
        "target_flow_rate",
        "valve_interval_s",
        "epsilon",
        "target_weight",
        "current_weight",
        "current_flow_rate",
        "valve_position",
        "valve_steps",
        "battery_pct",
        "time_started",
        "time_completed",
        "error",
    ] {
        assert!(s.get(key).is_some(), "missing {key} in {s}");
    }
    assert_eq!(s["state"], "completed");
    assert_eq!(s["strategy"], "default");
    assert!(s["current_weight"].as_f64().unwrap() >= 250.0);
    assert!(s["error"].is_null());
}

#[rstest]
fn jsonl_error_schema() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[brew]\nepsilon = 9.0\n").unwrap();

    let out = Command::cargo_bin("coldbrew")
        .unwrap()
        .arg("--json")
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .assert()
        .code(2)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&out);
    let line = stderr
        .lines()
        .find(|l| l.contains("\"reason\""))
        .unwrap_or_else(|| panic!("no error JSON in: {stderr}"));
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["reason"], "Config");
    assert!(v["message"].as_str().unwrap().contains("epsilon"));
}

#[rstest]
fn strategies_json_lists_every_kind() {
    let out = Command::cargo_bin("coldbrew")
        .unwrap()
        .arg("--json")
        .arg("strategies")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let ids: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        [
            "default",
            "pid",
            "kalman_pid",
            "smith_predictor",
            "adaptive_gain_scheduling",
            "mpc"
        ]
    );
    assert_eq!(v[5]["params"]["horizon"], "15");
}
