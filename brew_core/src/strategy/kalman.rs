use super::pid::{PidParams, PidState};
use super::{Setpoints, ValveCommand, positive};
use crate::error::BrewError;

/// Scalar Kalman filter for a random-walk flow rate.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilter {
    q: f64,
    r: f64,
    estimate: f64,
    variance: f64,
}

impl KalmanFilter {
    pub fn new(q: f64, r: f64, initial: f64) -> Self {
        Self {
            q,
            r,
            estimate: initial,
            variance: 1.0,
        }
    }

    pub fn update(&mut self, measurement: f64) -> f64 {
        self.variance += self.q;
        let gain = self.variance / (self.variance + self.r);
        self.estimate += gain * (measurement - self.estimate);
        self.variance *= 1.0 - gain;
        self.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

/// Process and measurement noise of the flow filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanParams {
    pub q: f64,
    pub r: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self { q: 0.0005, r: 0.15 }
    }
}

impl KalmanParams {
    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        positive("q", self.q)?;
        positive("r", self.r)
    }

    pub(crate) fn filter(&self, initial: f64) -> KalmanFilter {
        KalmanFilter::new(self.q, self.r, initial)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KalmanPidParams {
    pub pid: PidParams,
    pub kalman: KalmanParams,
}

impl KalmanPidParams {
    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        self.pid.validate()?;
        self.kalman.validate()
    }

    pub(crate) fn param_table(&self) -> Vec<(&'static str, String)> {
        let mut t = self.pid.param_table();
        t.push(("q", self.kalman.q.to_string()));
        t.push(("r", self.kalman.r.to_string()));
        t
    }
}

/// PID driven by the filtered flow instead of the raw estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanPidStrategy {
    params: KalmanPidParams,
    setpoints: Setpoints,
    filter: KalmanFilter,
    pid: PidState,
}

impl KalmanPidStrategy {
    pub fn new(params: KalmanPidParams, setpoints: Setpoints) -> Self {
        let filter = params.kalman.filter(setpoints.target_flow_rate);
        Self {
            params,
            setpoints,
            filter,
            pid: PidState::default(),
        }
    }

    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }

    pub fn step(&mut self, flow: f64) -> (ValveCommand, u32) {
        let filtered = self.filter.update(flow);
        let error = self.setpoints.target_flow_rate - filtered;
        let pid = &self.params.pid;
        let out = self
            .pid
            .update(&pid.gains, pid.integral_limit, error, self.setpoints.dt_s);
        pid.actuation.command(out)
    }
}
