//! Valve control strategies.
//!
//! Every strategy answers the same question once per control tick: given the
//! latest flow estimate (and weight), which way should the valve move and by
//! how many steps. The set is closed, so `Strategy` is an enum and dispatch is
//! an exhaustive `match`. `step` only touches the strategy's own state: no I/O,
//! no clocks. Time enters through `Setpoints::dt_s`, the fixed valve interval.

pub mod adaptive;
pub mod kalman;
pub mod mpc;
pub mod pid;
pub mod plant;
pub mod smith;
pub mod threshold;

use brew_traits::Direction;
use serde::Serialize;

use crate::error::BrewError;

pub use adaptive::{AdaptiveParams, AdaptiveStrategy, GainRegion};
pub use kalman::{KalmanFilter, KalmanParams, KalmanPidParams, KalmanPidStrategy};
pub use mpc::{MpcParams, MpcStrategy};
pub use pid::{PidGains, PidParams, PidState, PidStrategy};
pub use plant::FirstOrderPlant;
pub use smith::{SmithParams, SmithStrategy};
pub use threshold::ThresholdStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValveCommand {
    Forward,
    Backward,
    Hold,
}

impl ValveCommand {
    pub fn direction(self) -> Option<Direction> {
        match self {
            ValveCommand::Forward => Some(Direction::Forward),
            ValveCommand::Backward => Some(Direction::Backward),
            ValveCommand::Hold => None,
        }
    }
}

/// Brew setpoints every strategy is built against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoints {
    pub target_flow_rate: f64,
    pub epsilon: f64,
    /// Seconds between control ticks.
    pub dt_s: f64,
}

/// Mapping from a continuous controller output to a valve command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actuation {
    /// Output is clamped to `[-output_limit, output_limit]`.
    pub output_limit: f64,
    /// `|output|` below this holds the valve.
    pub deadband: f64,
    /// Most steps issued in one tick.
    pub max_steps: u32,
}

impl Default for Actuation {
    fn default() -> Self {
        Self {
            output_limit: 10.0,
            deadband: 0.1,
            max_steps: 5,
        }
    }
}

impl Actuation {
    /// Sign picks the direction, rounded magnitude (at least one) the step count.
    pub fn command(&self, output: f64) -> (ValveCommand, u32) {
        if !output.is_finite() {
            return (ValveCommand::Hold, 0);
        }
        let out = output.clamp(-self.output_limit, self.output_limit);
        if out == 0.0 || out.abs() < self.deadband {
            return (ValveCommand::Hold, 0);
        }
        let steps = (out.abs().round() as u32).clamp(1, self.max_steps);
        if out > 0.0 {
            (ValveCommand::Forward, steps)
        } else {
            (ValveCommand::Backward, steps)
        }
    }

    pub fn clamp(&self, output: f64) -> f64 {
        output.clamp(-self.output_limit, self.output_limit)
    }

    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        positive("output_limit", self.output_limit)?;
        if !(self.deadband.is_finite() && self.deadband >= 0.0) {
            return Err(invalid("deadband must be >= 0"));
        }
        if self.deadband >= self.output_limit {
            return Err(invalid("deadband must be below output_limit"));
        }
        if !(1..=199).contains(&self.max_steps) {
            return Err(invalid("max_steps must be in [1, 199]"));
        }
        Ok(())
    }
}

pub(crate) fn invalid(msg: impl Into<String>) -> BrewError {
    BrewError::Config(format!("strategy.params.{}", msg.into()))
}

pub(crate) fn positive(name: &str, v: f64) -> Result<(), BrewError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be > 0")))
    }
}

pub(crate) fn non_negative(name: &str, v: f64) -> Result<(), BrewError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be >= 0")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Default,
    Pid,
    KalmanPid,
    SmithPredictor,
    AdaptiveGainScheduling,
    Mpc,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Default,
        StrategyKind::Pid,
        StrategyKind::KalmanPid,
        StrategyKind::SmithPredictor,
        StrategyKind::AdaptiveGainScheduling,
        StrategyKind::Mpc,
    ];

    pub fn id(self) -> &'static str {
        match self {
            StrategyKind::Default => "default",
            StrategyKind::Pid => "pid",
            StrategyKind::KalmanPid => "kalman_pid",
            StrategyKind::SmithPredictor => "smith_predictor",
            StrategyKind::AdaptiveGainScheduling => "adaptive_gain_scheduling",
            StrategyKind::Mpc => "mpc",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StrategyKind::Default => "one step toward the target when outside +/- epsilon",
            StrategyKind::Pid => "PID on the flow error",
            StrategyKind::KalmanPid => "PID on a Kalman-filtered flow estimate",
            StrategyKind::SmithPredictor => "PID on a dead-time compensated flow prediction",
            StrategyKind::AdaptiveGainScheduling => {
                "PID with gains scheduled by flow region and adapted to sustained error"
            }
            StrategyKind::Mpc => "receding-horizon search over a first-order plant model",
        }
    }

    /// Parameter names with their default values.
    pub fn default_params(self) -> Vec<(&'static str, String)> {
        StrategyConfig::defaults_for(self).param_table()
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Strategy choice plus fully resolved parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StrategyConfig {
    #[default]
    Default,
    Pid(PidParams),
    KalmanPid(KalmanPidParams),
    SmithPredictor(SmithParams),
    AdaptiveGainScheduling(AdaptiveParams),
    Mpc(MpcParams),
}

impl StrategyConfig {
    pub fn defaults_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Default => StrategyConfig::Default,
            StrategyKind::Pid => StrategyConfig::Pid(PidParams::default()),
            StrategyKind::KalmanPid => StrategyConfig::KalmanPid(KalmanPidParams::default()),
            StrategyKind::SmithPredictor => StrategyConfig::SmithPredictor(SmithParams::default()),
            StrategyKind::AdaptiveGainScheduling => {
                StrategyConfig::AdaptiveGainScheduling(AdaptiveParams::default())
            }
            StrategyKind::Mpc => StrategyConfig::Mpc(MpcParams::default()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyConfig::Default => StrategyKind::Default,
            StrategyConfig::Pid(_) => StrategyKind::Pid,
            StrategyConfig::KalmanPid(_) => StrategyKind::KalmanPid,
            StrategyConfig::SmithPredictor(_) => StrategyKind::SmithPredictor,
            StrategyConfig::AdaptiveGainScheduling(_) => StrategyKind::AdaptiveGainScheduling,
            StrategyConfig::Mpc(_) => StrategyKind::Mpc,
        }
    }

    pub fn validate(&self) -> Result<(), BrewError> {
        match self {
            StrategyConfig::Default => Ok(()),
            StrategyConfig::Pid(p) => p.validate(),
            StrategyConfig::KalmanPid(p) => p.validate(),
            StrategyConfig::SmithPredictor(p) => p.validate(),
            StrategyConfig::AdaptiveGainScheduling(p) => p.validate(),
            StrategyConfig::Mpc(p) => p.validate(),
        }
    }

    fn param_table(&self) -> Vec<(&'static str, String)> {
        match self {
            StrategyConfig::Default => Vec::new(),
            StrategyConfig::Pid(p) => p.param_table(),
            StrategyConfig::KalmanPid(p) => p.param_table(),
            StrategyConfig::SmithPredictor(p) => p.param_table(),
            StrategyConfig::AdaptiveGainScheduling(p) => p.param_table(),
            StrategyConfig::Mpc(p) => p.param_table(),
        }
    }
}

/// Live strategy: parameters plus running state for one brew.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Default(ThresholdStrategy),
    Pid(PidStrategy),
    KalmanPid(KalmanPidStrategy),
    SmithPredictor(SmithStrategy),
    AdaptiveGainScheduling(AdaptiveStrategy),
    Mpc(MpcStrategy),
}

impl Strategy {
    pub fn new(config: &StrategyConfig, setpoints: Setpoints) -> Self {
        match config {
            StrategyConfig::Default => Strategy::Default(ThresholdStrategy::new(setpoints)),
            StrategyConfig::Pid(p) => Strategy::Pid(PidStrategy::new(p.clone(), setpoints)),
            StrategyConfig::KalmanPid(p) => {
                Strategy::KalmanPid(KalmanPidStrategy::new(p.clone(), setpoints))
            }
            StrategyConfig::SmithPredictor(p) => {
                Strategy::SmithPredictor(SmithStrategy::new(p.clone(), setpoints))
            }
            StrategyConfig::AdaptiveGainScheduling(p) => {
                Strategy::AdaptiveGainScheduling(AdaptiveStrategy::new(p.clone(), setpoints))
            }
            StrategyConfig::Mpc(p) => Strategy::Mpc(MpcStrategy::new(p.clone(), setpoints)),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Default(_) => StrategyKind::Default,
            Strategy::Pid(_) => StrategyKind::Pid,
            Strategy::KalmanPid(_) => StrategyKind::KalmanPid,
            Strategy::SmithPredictor(_) => StrategyKind::SmithPredictor,
            Strategy::AdaptiveGainScheduling(_) => StrategyKind::AdaptiveGainScheduling,
            Strategy::Mpc(_) => StrategyKind::Mpc,
        }
    }

    /// One control decision. A missing (or non-finite) flow estimate always
    /// holds and leaves the state untouched.
    pub fn step(
        &mut self,
        flow_rate: Option<f64>,
        current_weight: Option<f64>,
    ) -> (ValveCommand, u32) {
        let Some(flow) = flow_rate.filter(|f| f.is_finite()) else {
            return (ValveCommand::Hold, 0);
        };
        let out = match self {
            Strategy::Default(s) => s.step(flow),
            Strategy::Pid(s) => s.step(flow),
            Strategy::KalmanPid(s) => s.step(flow),
            Strategy::SmithPredictor(s) => s.step(flow),
            Strategy::AdaptiveGainScheduling(s) => s.step(flow),
            Strategy::Mpc(s) => s.step(flow),
        };
        tracing::debug!(
            strategy = %self.kind(),
            flow,
            weight = ?current_weight,
            command = ?out.0,
            steps = out.1,
            "strategy step"
        );
        out
    }
}
