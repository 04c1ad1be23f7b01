use super::{Actuation, Setpoints, ValveCommand, non_negative, positive};
use crate::error::BrewError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.05,
            kd: 0.1,
        }
    }
}

impl PidGains {
    pub(crate) fn validate(&self, suffix: &str) -> Result<(), BrewError> {
        non_negative(&format!("kp{suffix}"), self.kp)?;
        non_negative(&format!("ki{suffix}"), self.ki)?;
        non_negative(&format!("kd{suffix}"), self.kd)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            kp: self.kp * factor,
            ki: self.ki * factor,
            kd: self.kd * factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PidParams {
    pub gains: PidGains,
    /// Anti-windup bound on the accumulated `error * dt`.
    pub integral_limit: f64,
    pub actuation: Actuation,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            gains: PidGains::default(),
            integral_limit: 20.0,
            actuation: Actuation::default(),
        }
    }
}

impl PidParams {
    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        self.gains.validate("")?;
        self.validate_limits()
    }

    pub(crate) fn validate_limits(&self) -> Result<(), BrewError> {
        positive("integral_limit", self.integral_limit)?;
        self.actuation.validate()
    }

    pub(crate) fn param_table(&self) -> Vec<(&'static str, String)> {
        let mut t = vec![
            ("kp", self.gains.kp.to_string()),
            ("ki", self.gains.ki.to_string()),
            ("kd", self.gains.kd.to_string()),
        ];
        t.extend(self.limit_table());
        t
    }

    pub(crate) fn limit_table(&self) -> Vec<(&'static str, String)> {
        vec![
            ("integral_limit", self.integral_limit.to_string()),
            ("output_limit", self.actuation.output_limit.to_string()),
            ("deadband", self.actuation.deadband.to_string()),
            ("max_steps", self.actuation.max_steps.to_string()),
        ]
    }
}

/// Integrator and derivative memory, shared by every PID-based strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PidState {
    pub integral: f64,
    pub prev_error: f64,
}

impl PidState {
    /// Advances the controller by one tick and returns the raw (unclamped) output.
    pub fn update(&mut self, gains: &PidGains, integral_limit: f64, error: f64, dt_s: f64) -> f64 {
        self.integral = (self.integral + error * dt_s).clamp(-integral_limit, integral_limit);
        let derivative = error - self.prev_error;
        self.prev_error = error;
        gains.kp * error + gains.ki * self.integral + gains.kd * derivative
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PidStrategy {
    params: PidParams,
    setpoints: Setpoints,
    state: PidState,
}

impl PidStrategy {
    pub fn new(params: PidParams, setpoints: Setpoints) -> Self {
        Self {
            params,
            setpoints,
            state: PidState::default(),
        }
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    pub fn step(&mut self, flow: f64) -> (ValveCommand, u32) {
        let error = self.setpoints.target_flow_rate - flow;
        let out = self.state.update(
            &self.params.gains,
            self.params.integral_limit,
            error,
            self.setpoints.dt_s,
        );
        self.params.actuation.command(out)
    }
}
