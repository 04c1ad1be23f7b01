use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Small brew on the simulator: ~30 g to go, finishes in well under an hour of sim time
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[brew]
target_flow_rate = 0.05
valve_interval_s = 60
epsilon = 0.008
target_weight_g = 260.0

[strategy]
kind = "default"

[sampling]
interval_ms = 500

[simulation]
initial_weight_g = 229.0
noise_g = 0.02
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn coldbrew() -> Command {
    let mut cmd = Command::cargo_bin("coldbrew").unwrap();
    cmd.arg("--log-level").arg("error");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["strategies"], 0, "kalman_pid", "stdout")]
#[case(&["self-check"], 0, "self-check ok", "stdout")]
#[case(&["brew", "--fast", "--status-every-s", "600"], 0, "brew complete", "stdout")]
#[case(&["brew", "--fast", "--max-hours", "0.1"], 6, "had not reached its target", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = coldbrew();
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => assert.stdout(predicate::str::contains(needle)),
        _ => assert.stderr(predicate::str::contains(needle)),
    };
}

#[test]
fn strategies_list_parameters_with_defaults() {
    coldbrew()
        .arg("strategies")
        .assert()
        .success()
        .stdout(predicate::str::contains("(no parameters)"))
        .stdout(predicate::str::contains("kp = 1"))
        .stdout(predicate::str::contains("horizon = 15"));
}

#[test]
fn out_of_range_setpoint_is_a_config_error() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    fs::write(&cfg, "[brew]\ntarget_flow_rate = 0.5\n").unwrap();
    coldbrew()
        .arg("--config")
        .arg(&cfg)
        .arg("brew")
        .arg("--fast")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("target_flow_rate"));
}

#[test]
fn unknown_strategy_parameter_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    fs::write(
        &cfg,
        "[strategy]\nkind = \"pid\"\n\n[strategy.params]\nkp = 1.0\nwarp = 9\n",
    )
    .unwrap();
    coldbrew()
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("warp"));
}

#[test]
fn missing_config_file_fails_cleanly() {
    coldbrew()
        .arg("--config")
        .arg("/definitely/not/here.toml")
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("read config"));
}

#[test]
fn exhausted_trace_ends_in_a_scale_fault() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let trace = dir.path().join("trace.csv");
    let mut csv = String::from("seconds,weight\n");
    for i in 0..=20 {
        csv.push_str(&format!("{}.0,{:.2}\n", i, 229.0 + 0.05 * f64::from(i)));
    }
    fs::write(&trace, csv).unwrap();

    coldbrew()
        .arg("--config")
        .arg(&cfg)
        .arg("brew")
        .arg("--fast")
        .arg("--trace")
        .arg(&trace)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("What happened: The brew stopped with a Scale fault"));
}

#[test]
fn trace_with_wrong_headers_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let trace = dir.path().join("trace.csv");
    fs::write(&trace, "t,grams\n0,1\n1,2\n").unwrap();

    coldbrew()
        .arg("--config")
        .arg(&cfg)
        .arg("brew")
        .arg("--fast")
        .arg("--trace")
        .arg(&trace)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Expected 'seconds,weight'"));
}
