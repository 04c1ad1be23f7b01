use std::collections::VecDeque;

use super::kalman::{KalmanFilter, KalmanParams};
use super::pid::{PidParams, PidState};
use super::plant::FirstOrderPlant;
use super::{Setpoints, ValveCommand, invalid, non_negative};
use crate::error::BrewError;

/// Longest transport delay accepted, in seconds.
pub const MAX_DEAD_TIME_S: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SmithParams {
    pub pid: PidParams,
    /// Transport delay between valve movement and the scale seeing it, in seconds.
    pub dead_time: f64,
    pub plant: FirstOrderPlant,
    pub kalman: KalmanParams,
}

impl Default for SmithParams {
    fn default() -> Self {
        Self {
            pid: PidParams::default(),
            dead_time: 45.0,
            plant: FirstOrderPlant::default(),
            kalman: KalmanParams::default(),
        }
    }
}

impl SmithParams {
    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        self.pid.validate()?;
        non_negative("dead_time", self.dead_time)?;
        if self.dead_time > MAX_DEAD_TIME_S {
            return Err(invalid(format!("dead_time must be <= {MAX_DEAD_TIME_S} s")));
        }
        self.plant.validate()?;
        self.kalman.validate()
    }

    pub(crate) fn param_table(&self) -> Vec<(&'static str, String)> {
        let mut t = self.pid.param_table();
        t.extend([
            ("dead_time", self.dead_time.to_string()),
            ("plant_gain", self.plant.gain.to_string()),
            ("plant_time_constant", self.plant.time_constant.to_string()),
            ("q", self.kalman.q.to_string()),
            ("r", self.kalman.r.to_string()),
        ]);
        t
    }
}

/// Dead-time compensation around a PID.
///
/// Two copies of the plant model run side by side: one sees the controller
/// output immediately, the other through a delay line of `dead_time / dt`
/// ticks. Their difference is added to the filtered measurement so the PID
/// acts on where the flow is heading rather than where it was.
#[derive(Debug, Clone, PartialEq)]
pub struct SmithStrategy {
    params: SmithParams,
    setpoints: Setpoints,
    filter: KalmanFilter,
    pid: PidState,
    alpha: f64,
    delay_line: VecDeque<f64>,
    model_fast: f64,
    model_delayed: f64,
    last_output: f64,
}

impl SmithStrategy {
    pub fn new(params: SmithParams, setpoints: Setpoints) -> Self {
        let delay = ((params.dead_time / setpoints.dt_s).floor() as usize).max(1);
        Self {
            filter: params.kalman.filter(setpoints.target_flow_rate),
            alpha: params.plant.alpha(setpoints.dt_s),
            delay_line: std::iter::repeat_n(0.0, delay).collect(),
            params,
            setpoints,
            pid: PidState::default(),
            model_fast: 0.0,
            model_delayed: 0.0,
            last_output: 0.0,
        }
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_line.len()
    }

    pub fn step(&mut self, flow: f64) -> (ValveCommand, u32) {
        let filtered = self.filter.update(flow);

        self.delay_line.push_back(self.last_output);
        let delayed = self.delay_line.pop_front().unwrap_or(0.0);
        let plant = &self.params.plant;
        self.model_fast = plant.advance(self.alpha, self.model_fast, self.last_output);
        self.model_delayed = plant.advance(self.alpha, self.model_delayed, delayed);

        let predicted = filtered + self.model_fast - self.model_delayed;
        let error = self.setpoints.target_flow_rate - predicted;
        let pid = &self.params.pid;
        let out = self
            .pid
            .update(&pid.gains, pid.integral_limit, error, self.setpoints.dt_s);
        self.last_output = pid.actuation.clamp(out);
        pid.actuation.command(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(dt: f64) -> Setpoints {
        Setpoints {
            target_flow_rate: 0.05,
            epsilon: 0.008,
            dt_s: dt,
        }
    }

    #[test]
    fn delay_line_has_at_least_one_slot() {
        let s = SmithStrategy::new(SmithParams::default(), sp(60.0));
        assert_eq!(s.delay_samples(), 1);
        let s = SmithStrategy::new(SmithParams::default(), sp(10.0));
        assert_eq!(s.delay_samples(), 4);
        let p = SmithParams {
            dead_time: 0.0,
            ..SmithParams::default()
        };
        assert_eq!(SmithStrategy::new(p, sp(10.0)).delay_samples(), 1);
    }

    #[test]
    fn dead_time_is_capped() {
        let mut p = SmithParams {
            dead_time: MAX_DEAD_TIME_S,
            ..SmithParams::default()
        };
        p.validate().unwrap();
        p.dead_time = 1e300;
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("dead_time"), "{err}");
    }

    #[test]
    fn delay_line_length_is_constant() {
        let mut s = SmithStrategy::new(SmithParams::default(), sp(10.0));
        for flow in [0.01, 0.02, 0.08, 0.05] {
            s.step(flow);
            assert_eq!(s.delay_samples(), 4);
        }
    }

    #[test]
    fn slow_flow_eventually_opens() {
        let mut s = SmithStrategy::new(SmithParams::default(), sp(60.0));
        let opened = (0..10).any(|_| s.step(0.02).0 == ValveCommand::Forward);
        assert!(opened);
    }
}
