//! Brew session identity, lifecycle state and the public snapshot.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{BrewError, FaultRecord};
use crate::strategy::{Setpoints, StrategyConfig, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Brew lifecycle.
///
/// ```text
/// Idle -> Brewing <-> Paused
///            |          |
///            v          v
///        Completed    Error
/// ```
/// Completed and Error are terminal for a session; kill clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrewState {
    Idle,
    Brewing,
    Paused,
    Completed,
    Error,
}

impl BrewState {
    /// Brewing or Paused: the session still owns the valve.
    pub fn is_live(self) -> bool {
        matches!(self, BrewState::Brewing | BrewState::Paused)
    }
}

impl fmt::Display for BrewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrewState::Idle => "idle",
            BrewState::Brewing => "brewing",
            BrewState::Paused => "paused",
            BrewState::Completed => "completed",
            BrewState::Error => "error",
        })
    }
}

/// Accepted setpoint ranges as `(low, high, closed)`; open ranges exclude both ends.
pub mod limits {
    pub const TARGET_FLOW_RATE: (f64, f64, bool) = (0.02, 0.08, true);
    pub const VALVE_INTERVAL_S: (f64, f64, bool) = (4.0, 1024.0, true);
    pub const EPSILON: (f64, f64, bool) = (0.0, 4.0, false);
    pub const TARGET_WEIGHT_G: (f64, f64, bool) = (0.0, 1340.0, false);
}

/// Everything needed to start a brew.
#[derive(Debug, Clone, PartialEq)]
pub struct BrewConfig {
    /// Grams per second.
    pub target_flow_rate: f64,
    pub valve_interval: Duration,
    /// Half-width of the acceptable flow band, g/s.
    pub epsilon: f64,
    /// Grams on the scale at which the brew completes.
    pub target_weight: f64,
    pub strategy: StrategyConfig,
    /// Drive the valve back to its starting position when the brew is killed.
    pub return_to_start_on_kill: bool,
}

impl Default for BrewConfig {
    fn default() -> Self {
        Self {
            target_flow_rate: 0.05,
            valve_interval: Duration::from_secs(60),
            epsilon: 0.008,
            target_weight: 1337.0,
            strategy: StrategyConfig::Default,
            return_to_start_on_kill: true,
        }
    }
}

impl BrewConfig {
    /// Rejects anything outside the accepted ranges. Values are never clamped.
    pub fn validate(&self) -> Result<(), BrewError> {
        fn check(
            name: &str,
            v: f64,
            (lo, hi, closed): (f64, f64, bool),
            unit: &str,
        ) -> Result<(), BrewError> {
            let ok = if closed {
                lo <= v && v <= hi
            } else {
                lo < v && v < hi
            };
            if ok {
                return Ok(());
            }
            let (open, close) = if closed { ('[', ']') } else { ('(', ')') };
            Err(BrewError::Config(format!(
                "{name} must be in {open}{lo}, {hi}{close} {unit}, got {v}"
            )))
        }
        check(
            "target_flow_rate",
            self.target_flow_rate,
            limits::TARGET_FLOW_RATE,
            "g/s",
        )?;
        check(
            "valve_interval",
            self.valve_interval.as_secs_f64(),
            limits::VALVE_INTERVAL_S,
            "s",
        )?;
        check("epsilon", self.epsilon, limits::EPSILON, "g/s")?;
        check("target_weight", self.target_weight, limits::TARGET_WEIGHT_G, "g")?;
        self.strategy.validate()
    }

    pub fn setpoints(&self) -> Setpoints {
        Setpoints {
            target_flow_rate: self.target_flow_rate,
            epsilon: self.epsilon,
            dt_s: self.valve_interval.as_secs_f64(),
        }
    }
}

/// Point-in-time view of a brew, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrewSession {
    pub id: SessionId,
    pub state: BrewState,
    pub strategy: StrategyKind,
    pub target_flow_rate: f64,
    pub valve_interval_s: f64,
    pub epsilon: f64,
    pub target_weight: f64,
    pub current_weight: Option<f64>,
    pub current_flow_rate: Option<f64>,
    pub valve_position: u8,
    /// Steps issued by this brew's own control decisions.
    pub valve_steps: u64,
    pub battery_pct: Option<u8>,
    pub time_started: DateTime<Utc>,
    pub time_completed: Option<DateTime<Utc>>,
    pub error: Option<FaultRecord>,
}

impl BrewSession {
    pub(crate) fn new(
        id: SessionId,
        config: &BrewConfig,
        valve_position: u8,
        time_started: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state: BrewState::Brewing,
            strategy: config.strategy.kind(),
            target_flow_rate: config.target_flow_rate,
            valve_interval_s: config.valve_interval.as_secs_f64(),
            epsilon: config.epsilon,
            target_weight: config.target_weight,
            current_weight: None,
            current_flow_rate: None,
            valve_position,
            valve_steps: 0,
            battery_pct: None,
            time_started,
            time_completed: None,
            error: None,
        }
    }
}
