use brew_config::{EstimatorKind, StrategyCfg, StrategyKind, load_toml};
use rstest::rstest;

const FULL: &str = r#"
[brew]
target_flow_rate = 0.05
valve_interval_s = 60
epsilon = 0.008
target_weight_g = 1337
return_to_start_on_kill = false

[strategy]
kind = "kalman_pid"

[strategy.params]
kp = 1.0
q = 0.001
r = 0.1

[sampling]
interval_ms = 500
max_consecutive_failures = 3
estimator = "linear_fit"

[store]
retention_s = 3600

[logging]
rotation = "daily"
"#;

#[test]
fn full_config_parses_and_validates() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.strategy.kind, StrategyKind::KalmanPid);
    assert_eq!(cfg.sampling.estimator, EstimatorKind::LinearFit);
    assert!(!cfg.brew.return_to_start_on_kill);
    match cfg.strategy.typed().unwrap() {
        StrategyCfg::KalmanPid(p) => {
            assert_eq!(p.kp, Some(1.0));
            assert_eq!(p.q, Some(0.001));
            assert_eq!(p.ki, None);
        }
        other => panic!("unexpected strategy {other:?}"),
    }
}

#[test]
fn empty_config_uses_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.brew.target_weight_g, 1337.0);
    assert_eq!(cfg.sampling.interval_ms, 500);
    assert_eq!(cfg.strategy.typed().unwrap(), StrategyCfg::Default);
}

#[rstest]
#[case("[brew]\ntarget_flow_rate = 0.09", "target_flow_rate")]
#[case("[brew]\ntarget_flow_rate = 0.019", "target_flow_rate")]
#[case("[brew]\nvalve_interval_s = 3", "valve_interval_s")]
#[case("[brew]\nvalve_interval_s = 1025", "valve_interval_s")]
#[case("[brew]\nepsilon = 0.0", "epsilon")]
#[case("[brew]\nepsilon = 4.0", "epsilon")]
#[case("[brew]\ntarget_weight_g = 1340", "target_weight_g")]
#[case("[brew]\ntarget_weight_g = 0", "target_weight_g")]
#[case("[sampling]\ninterval_ms = 0", "interval_ms")]
#[case("[sampling]\nmax_consecutive_failures = 0", "max_consecutive_failures")]
#[case("[store]\nmax_consecutive_failures = 0", "max_consecutive_failures")]
#[case("[simulation]\ninitial_position = 200", "initial_position")]
#[case("[logging]\nrotation = \"weekly\"", "rotation")]
fn out_of_range_values_are_rejected(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[rstest]
#[case("pid", "kp = -1.0", "kp")]
#[case("kalman_pid", "r = 0.0", "r")]
#[case("smith_predictor", "plant_time_constant = 0.0", "plant_time_constant")]
#[case("adaptive_gain_scheduling", "max_adaptation_factor = 0.5", "max_adaptation_factor")]
#[case("adaptive_gain_scheduling", "kd_high = -0.1", "kd_high")]
#[case("smith_predictor", "dead_time = 3600.5", "dead_time")]
#[case("smith_predictor", "dead_time = 1e300", "dead_time")]
#[case("adaptive_gain_scheduling", "adaptation_rate = 1.5", "adaptation_rate")]
#[case(
    "adaptive_gain_scheduling",
    "flow_rate_low_threshold = 0.06\nflow_rate_high_threshold = 0.04",
    "flow_rate_low_threshold"
)]
#[case("mpc", "horizon = 0", "horizon")]
#[case("pid", "max_steps = 0", "max_steps")]
fn bad_strategy_params_are_rejected(#[case] kind: &str, #[case] param: &str, #[case] needle: &str) {
    let toml = format!("[strategy]\nkind = \"{kind}\"\n[strategy.params]\n{param}\n");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[test]
fn unknown_strategy_param_is_rejected() {
    let toml = "[strategy]\nkind = \"pid\"\n[strategy.params]\nkp = 1.0\nkq = 2.0\n";
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("unknown key");
    assert!(format!("{err}").contains("kq"), "{err}");
}

#[test]
fn default_strategy_takes_no_params() {
    let toml = "[strategy]\nkind = \"default\"\n[strategy.params]\nkp = 1.0\n";
    let cfg = load_toml(toml).expect("parse TOML");
    assert!(cfg.validate().is_err());
}

#[test]
fn unknown_strategy_kind_fails_to_parse() {
    assert!(load_toml("[strategy]\nkind = \"bang_bang\"\n").is_err());
}

#[test]
fn unknown_section_key_fails_to_parse() {
    assert!(load_toml("[brew]\ntarget_flow = 0.05\n").is_err());
}

#[test]
fn pins_section_is_optional_and_checked() {
    let cfg = load_toml("[pins]\nvalve_step = 20\nvalve_dir = 21\nvalve_en = 16\n").unwrap();
    cfg.validate().unwrap();
    let pins = cfg.pins.as_ref().unwrap();
    assert_eq!(pins.steps_per_sec, 200);
    assert_eq!(pins.valve_en, Some(16));

    let clash = load_toml("[pins]\nvalve_step = 20\nvalve_dir = 20\n").unwrap();
    let err = clash.validate().unwrap_err();
    assert!(format!("{err}").contains("distinct"), "{err}");
}
