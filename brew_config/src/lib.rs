#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and brew-trace parsing for the cold-brew controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Strategy parameters are kept as a raw table until `StrategySection::typed`
//!   checks them against the schema of the selected strategy. Values left
//!   out fall back to the engine defaults, unknown keys are rejected.
//! - The trace CSV loader enforces headers and ordering so a recorded brew
//!   can be replayed through the simulator.
use serde::Deserialize;

/// Brew trace CSV schema.
///
/// Expected headers:
/// seconds,weight
///
/// Example:
/// seconds,weight
/// 0.0,229.0
/// 0.5,229.1
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TraceRow {
    pub seconds: f64,
    pub weight: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct BrewCfg {
    /// Flow rate to hold (g/s).
    pub target_flow_rate: f64,
    /// Seconds between control decisions.
    pub valve_interval_s: f64,
    /// Threshold strategy tolerance around the target flow (g/s).
    pub epsilon: f64,
    /// Scale reading at which the brew is complete (g).
    pub target_weight_g: f64,
    /// Step the valve back to where it started when a brew is killed.
    pub return_to_start_on_kill: bool,
}

impl Default for BrewCfg {
    fn default() -> Self {
        Self {
            target_flow_rate: 0.05,
            valve_interval_s: 60.0,
            epsilon: 0.008,
            target_weight_g: 1337.0,
            return_to_start_on_kill: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Default,
    Pid,
    KalmanPid,
    SmithPredictor,
    AdaptiveGainScheduling,
    Mpc,
}

/// `[strategy]` as written: a kind plus an untyped `[strategy.params]` table.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StrategySection {
    pub kind: StrategyKind,
    pub params: toml::Table,
}

/// Strategy parameters after schema checking. `None` means "engine default".
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyCfg {
    Default,
    Pid(PidCfg),
    KalmanPid(KalmanPidCfg),
    SmithPredictor(SmithCfg),
    AdaptiveGainScheduling(AdaptiveCfg),
    Mpc(MpcCfg),
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PidCfg {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    pub integral_limit: Option<f64>,
    pub output_limit: Option<f64>,
    pub deadband: Option<f64>,
    pub max_steps: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct KalmanPidCfg {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    /// Process noise: how much the true flow drifts per tick.
    pub q: Option<f64>,
    /// Measurement noise: higher smooths more.
    pub r: Option<f64>,
    pub integral_limit: Option<f64>,
    pub output_limit: Option<f64>,
    pub deadband: Option<f64>,
    pub max_steps: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SmithCfg {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    /// Transport delay between a valve move and the scale seeing it (s).
    pub dead_time: Option<f64>,
    pub plant_gain: Option<f64>,
    pub plant_time_constant: Option<f64>,
    pub q: Option<f64>,
    pub r: Option<f64>,
    pub integral_limit: Option<f64>,
    pub output_limit: Option<f64>,
    pub deadband: Option<f64>,
    pub max_steps: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptiveCfg {
    pub kp_low: Option<f64>,
    pub ki_low: Option<f64>,
    pub kd_low: Option<f64>,
    pub kp_med: Option<f64>,
    pub ki_med: Option<f64>,
    pub kd_med: Option<f64>,
    pub kp_high: Option<f64>,
    pub ki_high: Option<f64>,
    pub kd_high: Option<f64>,
    pub flow_rate_low_threshold: Option<f64>,
    pub flow_rate_high_threshold: Option<f64>,
    pub adaptation_enabled: Option<bool>,
    pub adaptation_rate: Option<f64>,
    /// Upper bound on the gain multiplier reached through adaptation.
    pub max_adaptation_factor: Option<f64>,
    pub integral_limit: Option<f64>,
    pub output_limit: Option<f64>,
    pub deadband: Option<f64>,
    pub max_steps: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MpcCfg {
    pub horizon: Option<u32>,
    pub plant_gain: Option<f64>,
    pub plant_time_constant: Option<f64>,
    pub q_error: Option<f64>,
    pub q_control: Option<f64>,
    pub q_delta: Option<f64>,
    pub output_limit: Option<f64>,
    pub deadband: Option<f64>,
    pub max_steps: Option<u32>,
}

impl StrategySection {
    /// Check `params` against the schema of `kind`.
    pub fn typed(&self) -> eyre::Result<StrategyCfg> {
        fn parse<T: serde::de::DeserializeOwned>(
            kind: StrategyKind,
            params: &toml::Table,
        ) -> eyre::Result<T> {
            toml::Value::Table(params.clone())
                .try_into::<T>()
                .map_err(|e| eyre::eyre!("strategy.params for {kind:?}: {e}"))
        }

        Ok(match self.kind {
            StrategyKind::Default => {
                if let Some(key) = self.params.keys().next() {
                    eyre::bail!("strategy.params: the default strategy takes no parameters (got '{key}')");
                }
                StrategyCfg::Default
            }
            k @ StrategyKind::Pid => StrategyCfg::Pid(parse(k, &self.params)?),
            k @ StrategyKind::KalmanPid => StrategyCfg::KalmanPid(parse(k, &self.params)?),
            k @ StrategyKind::SmithPredictor => {
                StrategyCfg::SmithPredictor(parse(k, &self.params)?)
            }
            k @ StrategyKind::AdaptiveGainScheduling => {
                StrategyCfg::AdaptiveGainScheduling(parse(k, &self.params)?)
            }
            k @ StrategyKind::Mpc => StrategyCfg::Mpc(parse(k, &self.params)?),
        })
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Delta between the first and last sample of the window.
    #[default]
    Endpoints,
    /// Least-squares slope over every sample of the window.
    LinearFit,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingCfg {
    /// Scale read period (ms).
    pub interval_ms: u64,
    /// Consecutive failed reads before the brew is put into Error.
    pub max_consecutive_failures: u32,
    /// Upper bound on the backoff between failed reads (ms).
    pub backoff_cap_ms: u64,
    /// Weight drops larger than this while brewing are logged (g).
    pub weight_noise_tolerance_g: f64,
    /// Battery level under which a warning is logged (%).
    pub low_battery_pct: u8,
    pub estimator: EstimatorKind,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_consecutive_failures: 3,
            backoff_cap_ms: 8_000,
            weight_noise_tolerance_g: 2.0,
            low_battery_pct: 15,
            estimator: EstimatorKind::Endpoints,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct StoreCfg {
    /// How long samples are kept by the in-memory store (s).
    pub retention_s: u64,
    /// Consecutive failed writes/queries before the brew is put into Error.
    pub max_consecutive_failures: u32,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            retention_s: 2 * 60 * 60,
            max_consecutive_failures: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationCfg {
    /// Flow through a fully open valve (g/s).
    pub max_flow_gps: f64,
    /// First-order lag of the flow behind the valve (s).
    pub response_tau_s: f64,
    /// Uniform reading noise amplitude (g).
    pub noise_g: f64,
    /// Vessel plus grounds already on the scale (g).
    pub initial_weight_g: f64,
    pub initial_position: u8,
    pub battery_pct: u8,
    pub seed: u32,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            max_flow_gps: 0.2,
            response_tau_s: 15.0,
            noise_g: 0.02,
            initial_weight_g: 229.0,
            initial_position: 0,
            battery_pct: 100,
            seed: 0xC0FFEE,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// GPIO wiring of the valve's stepper driver (BCM numbering).
///
/// Only read by builds with the `hardware` feature.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PinsCfg {
    pub valve_step: u8,
    pub valve_dir: u8,
    #[serde(default)]
    pub valve_en: Option<u8>,
    #[serde(default = "default_steps_per_sec")]
    pub steps_per_sec: u32,
}

fn default_steps_per_sec() -> u32 {
    200
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub brew: BrewCfg,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub sampling: SamplingCfg,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub simulation: SimulationCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub pins: Option<PinsCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_trace_csv(path: &std::path::Path) -> eyre::Result<Vec<TraceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open trace CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["seconds", "weight"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "trace CSV must have headers 'seconds,weight', got: {}",
            actual.join(",")
        );
    }

    let mut rows: Vec<TraceRow> = Vec::new();
    for (idx, rec) in rdr.deserialize::<TraceRow>().enumerate() {
        let row = match rec {
            Ok(row) => row,
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        };
        if !row.seconds.is_finite() || row.seconds < 0.0 {
            eyre::bail!("trace row {}: seconds must be finite and >= 0", idx + 2);
        }
        if let Some(prev) = rows.last()
            && row.seconds <= prev.seconds
        {
            eyre::bail!(
                "trace row {}: seconds must be strictly increasing ({} after {})",
                idx + 2,
                row.seconds,
                prev.seconds
            );
        }
        rows.push(row);
    }
    if rows.len() < 2 {
        eyre::bail!("trace requires at least two rows, got {}", rows.len());
    }
    Ok(rows)
}

fn check_opt(name: &str, v: Option<f64>, ok: impl Fn(f64) -> bool, rule: &str) -> eyre::Result<()> {
    if let Some(x) = v
        && !(x.is_finite() && ok(x))
    {
        eyre::bail!("strategy.params.{name} must be {rule}");
    }
    Ok(())
}

fn check_limits(
    integral_limit: Option<f64>,
    output_limit: Option<f64>,
    deadband: Option<f64>,
    max_steps: Option<u32>,
) -> eyre::Result<()> {
    check_opt("integral_limit", integral_limit, |x| x > 0.0, "> 0")?;
    check_opt("output_limit", output_limit, |x| x > 0.0, "> 0")?;
    check_opt("deadband", deadband, |x| x >= 0.0, ">= 0")?;
    if let Some(n) = max_steps
        && !(1..=199).contains(&n)
    {
        eyre::bail!("strategy.params.max_steps must be in [1, 199]");
    }
    Ok(())
}

fn check_gains(prefix: &str, kp: Option<f64>, ki: Option<f64>, kd: Option<f64>) -> eyre::Result<()> {
    for (n, v) in [("kp", kp), ("ki", ki), ("kd", kd)] {
        check_opt(&format!("{n}{prefix}"), v, |x| x >= 0.0, ">= 0")?;
    }
    Ok(())
}

impl StrategyCfg {
    /// Sanity checks on the values that were provided. Cross-field rules that
    /// depend on defaults are enforced by the engine when the brew starts.
    pub fn validate(&self) -> eyre::Result<()> {
        match self {
            StrategyCfg::Default => {}
            StrategyCfg::Pid(p) => {
                check_gains("", p.kp, p.ki, p.kd)?;
                check_limits(p.integral_limit, p.output_limit, p.deadband, p.max_steps)?;
            }
            StrategyCfg::KalmanPid(p) => {
                check_gains("", p.kp, p.ki, p.kd)?;
                check_opt("q", p.q, |x| x > 0.0, "> 0")?;
                check_opt("r", p.r, |x| x > 0.0, "> 0")?;
                check_limits(p.integral_limit, p.output_limit, p.deadband, p.max_steps)?;
            }
            StrategyCfg::SmithPredictor(p) => {
                check_gains("", p.kp, p.ki, p.kd)?;
                check_opt(
                    "dead_time",
                    p.dead_time,
                    |x| (0.0..=3600.0).contains(&x),
                    "in [0, 3600] s",
                )?;
                check_opt("plant_gain", p.plant_gain, |x| x > 0.0, "> 0")?;
                check_opt("plant_time_constant", p.plant_time_constant, |x| x > 0.0, "> 0")?;
                check_opt("q", p.q, |x| x > 0.0, "> 0")?;
                check_opt("r", p.r, |x| x > 0.0, "> 0")?;
                check_limits(p.integral_limit, p.output_limit, p.deadband, p.max_steps)?;
            }
            StrategyCfg::AdaptiveGainScheduling(p) => {
                check_gains("_low", p.kp_low, p.ki_low, p.kd_low)?;
                check_gains("_med", p.kp_med, p.ki_med, p.kd_med)?;
                check_gains("_high", p.kp_high, p.ki_high, p.kd_high)?;
                check_opt("flow_rate_low_threshold", p.flow_rate_low_threshold, |x| x > 0.0, "> 0")?;
                check_opt("flow_rate_high_threshold", p.flow_rate_high_threshold, |x| x > 0.0, "> 0")?;
                if let (Some(low), Some(high)) = (p.flow_rate_low_threshold, p.flow_rate_high_threshold)
                    && low >= high
                {
                    eyre::bail!(
                        "strategy.params.flow_rate_low_threshold must be below flow_rate_high_threshold"
                    );
                }
                check_opt("adaptation_rate", p.adaptation_rate, |x| x > 0.0 && x <= 1.0, "in (0, 1]")?;
                check_opt("max_adaptation_factor", p.max_adaptation_factor, |x| x >= 1.0, ">= 1")?;
                check_limits(p.integral_limit, p.output_limit, p.deadband, p.max_steps)?;
            }
            StrategyCfg::Mpc(p) => {
                if let Some(h) = p.horizon
                    && !(1..=500).contains(&h)
                {
                    eyre::bail!("strategy.params.horizon must be in [1, 500]");
                }
                check_opt("plant_gain", p.plant_gain, |x| x > 0.0, "> 0")?;
                check_opt("plant_time_constant", p.plant_time_constant, |x| x > 0.0, "> 0")?;
                check_opt("q_error", p.q_error, |x| x > 0.0, "> 0")?;
                check_opt("q_control", p.q_control, |x| x >= 0.0, ">= 0")?;
                check_opt("q_delta", p.q_delta, |x| x >= 0.0, ">= 0")?;
                check_limits(None, p.output_limit, p.deadband, p.max_steps)?;
            }
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Brew setpoints (rejected, never clamped)
        let b = &self.brew;
        if !(b.target_flow_rate.is_finite() && (0.02..=0.08).contains(&b.target_flow_rate)) {
            eyre::bail!("brew.target_flow_rate must be in [0.02, 0.08] g/s");
        }
        if !(b.valve_interval_s.is_finite() && (4.0..=1024.0).contains(&b.valve_interval_s)) {
            eyre::bail!("brew.valve_interval_s must be in [4, 1024] s");
        }
        if !(b.epsilon.is_finite() && b.epsilon > 0.0 && b.epsilon < 4.0) {
            eyre::bail!("brew.epsilon must be in (0, 4)");
        }
        if !(b.target_weight_g.is_finite() && b.target_weight_g > 0.0 && b.target_weight_g < 1340.0)
        {
            eyre::bail!("brew.target_weight_g must be in (0, 1340) g");
        }

        // Strategy
        self.strategy.typed()?.validate()?;

        // Sampling
        if self.sampling.interval_ms == 0 {
            eyre::bail!("sampling.interval_ms must be >= 1");
        }
        if self.sampling.interval_ms > 60_000 {
            eyre::bail!("sampling.interval_ms is unreasonably large (>60s)");
        }
        if self.sampling.max_consecutive_failures == 0 {
            eyre::bail!("sampling.max_consecutive_failures must be >= 1");
        }
        if self.sampling.backoff_cap_ms < self.sampling.interval_ms {
            eyre::bail!("sampling.backoff_cap_ms must be >= sampling.interval_ms");
        }
        if !(self.sampling.weight_noise_tolerance_g.is_finite()
            && self.sampling.weight_noise_tolerance_g >= 0.0)
        {
            eyre::bail!("sampling.weight_noise_tolerance_g must be >= 0");
        }
        if self.sampling.low_battery_pct > 100 {
            eyre::bail!("sampling.low_battery_pct must be in [0, 100]");
        }

        // Store
        if self.store.max_consecutive_failures == 0 {
            eyre::bail!("store.max_consecutive_failures must be >= 1");
        }
        if (self.store.retention_s as f64) < b.valve_interval_s {
            eyre::bail!("store.retention_s must cover at least one valve interval");
        }

        // Simulation
        let s = &self.simulation;
        if !(s.max_flow_gps.is_finite() && s.max_flow_gps > 0.0) {
            eyre::bail!("simulation.max_flow_gps must be > 0");
        }
        if !(s.response_tau_s.is_finite() && s.response_tau_s >= 0.0) {
            eyre::bail!("simulation.response_tau_s must be >= 0");
        }
        if !(s.noise_g.is_finite() && s.noise_g >= 0.0) {
            eyre::bail!("simulation.noise_g must be >= 0");
        }
        if !(s.initial_weight_g.is_finite() && s.initial_weight_g >= 0.0) {
            eyre::bail!("simulation.initial_weight_g must be >= 0");
        }
        if s.initial_position >= 200 {
            eyre::bail!("simulation.initial_position must be in [0, 199]");
        }
        if s.battery_pct > 100 {
            eyre::bail!("simulation.battery_pct must be in [0, 100]");
        }

        if let Some(p) = &self.pins {
            let en_clash = p
                .valve_en
                .is_some_and(|en| en == p.valve_step || en == p.valve_dir);
            if p.valve_step == p.valve_dir || en_clash {
                eyre::bail!("pins: valve_step, valve_dir and valve_en must be distinct");
            }
            if !(1..=5_000).contains(&p.steps_per_sec) {
                eyre::bail!("pins.steps_per_sec must be in [1, 5000]");
            }
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
