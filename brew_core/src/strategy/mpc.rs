use super::plant::FirstOrderPlant;
use super::{Actuation, Setpoints, ValveCommand, invalid, non_negative};
use crate::error::BrewError;

/// Offsets from the previous control value tried on every tick.
const CANDIDATE_DELTAS: [f64; 9] = [-2.0, -1.0, -0.5, -0.25, 0.0, 0.25, 0.5, 1.0, 2.0];

#[derive(Debug, Clone, PartialEq)]
pub struct MpcParams {
    /// Prediction horizon in ticks.
    pub horizon: u32,
    pub plant: FirstOrderPlant,
    pub q_error: f64,
    pub q_control: f64,
    pub q_delta: f64,
    pub actuation: Actuation,
}

impl Default for MpcParams {
    fn default() -> Self {
        Self {
            horizon: 15,
            plant: FirstOrderPlant::default(),
            q_error: 1.0,
            q_control: 0.1,
            q_delta: 0.5,
            actuation: Actuation::default(),
        }
    }
}

impl MpcParams {
    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        if !(1..=500).contains(&self.horizon) {
            return Err(invalid("horizon must be in [1, 500]"));
        }
        self.plant.validate()?;
        non_negative("q_error", self.q_error)?;
        non_negative("q_control", self.q_control)?;
        non_negative("q_delta", self.q_delta)?;
        self.actuation.validate()
    }

    pub(crate) fn param_table(&self) -> Vec<(&'static str, String)> {
        vec![
            ("horizon", self.horizon.to_string()),
            ("plant_gain", self.plant.gain.to_string()),
            ("plant_time_constant", self.plant.time_constant.to_string()),
            ("q_error", self.q_error.to_string()),
            ("q_control", self.q_control.to_string()),
            ("q_delta", self.q_delta.to_string()),
            ("output_limit", self.actuation.output_limit.to_string()),
            ("deadband", self.actuation.deadband.to_string()),
            ("max_steps", self.actuation.max_steps.to_string()),
        ]
    }
}

/// Receding-horizon control over a first-order plant.
///
/// Each tick scores a small set of constant control moves around the previous
/// one over `horizon` ticks and applies the cheapest. Ties keep the first
/// candidate in `CANDIDATE_DELTAS` order.
#[derive(Debug, Clone, PartialEq)]
pub struct MpcStrategy {
    params: MpcParams,
    setpoints: Setpoints,
    alpha: f64,
    model_flow: Option<f64>,
    prev_control: f64,
}

impl MpcStrategy {
    pub fn new(params: MpcParams, setpoints: Setpoints) -> Self {
        Self {
            alpha: params.plant.alpha(setpoints.dt_s),
            params,
            setpoints,
            model_flow: None,
            prev_control: 0.0,
        }
    }

    pub fn model_flow(&self) -> Option<f64> {
        self.model_flow
    }

    pub fn prev_control(&self) -> f64 {
        self.prev_control
    }

    fn cost(&self, start_flow: f64, u: f64) -> f64 {
        let p = &self.params;
        let target = self.setpoints.target_flow_rate;
        let mut y = start_flow;
        let mut cost = p.q_delta * (u - self.prev_control).powi(2);
        for _ in 0..p.horizon {
            y = p.plant.advance(self.alpha, y, u);
            let e = target - y;
            cost += p.q_error * e * e + p.q_control * u * u;
        }
        cost
    }

    pub fn step(&mut self, flow: f64) -> (ValveCommand, u32) {
        let model = match self.model_flow {
            None => flow,
            Some(m) => self.params.plant.advance(self.alpha, m, self.prev_control),
        };
        self.model_flow = Some(model);

        let mut best = self.prev_control;
        let mut best_cost = f64::INFINITY;
        for delta in CANDIDATE_DELTAS {
            let u = self.params.actuation.clamp(self.prev_control + delta);
            let c = self.cost(flow, u);
            if c < best_cost {
                best_cost = c;
                best = u;
            }
        }
        tracing::debug!(flow, model, control = best, cost = best_cost, "mpc move");
        self.prev_control = best;
        self.params.actuation.command(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Setpoints {
        Setpoints {
            target_flow_rate: 0.05,
            epsilon: 0.008,
            dt_s: 60.0,
        }
    }

    #[test]
    fn first_step_seeds_model_with_measurement() {
        let mut m = MpcStrategy::new(MpcParams::default(), sp());
        assert_eq!(m.model_flow(), None);
        m.step(0.03);
        assert_eq!(m.model_flow(), Some(0.03));
    }

    fn effort_free() -> MpcParams {
        MpcParams {
            q_control: 0.0,
            q_delta: 0.0,
            ..MpcParams::default()
        }
    }

    #[test]
    fn slow_flow_raises_control() {
        let mut m = MpcStrategy::new(effort_free(), sp());
        assert_eq!(m.step(0.0), (ValveCommand::Forward, 2));
        assert_eq!(m.prev_control(), 2.0);
        m.step(0.0);
        assert_eq!(m.prev_control(), 4.0);
    }

    #[test]
    fn control_stays_within_output_limit() {
        let mut m = MpcStrategy::new(effort_free(), sp());
        for _ in 0..50 {
            m.step(0.0);
            assert!(m.prev_control().abs() <= 10.0);
        }
        assert_eq!(m.prev_control(), 10.0);
        assert_eq!(m.step(0.0), (ValveCommand::Forward, 5));
    }

    #[test]
    fn effort_weights_dominate_weak_plant() {
        // With the default gain even a full swing moves flow by ~0.01 g/s,
        // which never pays for the control and delta penalties.
        let mut m = MpcStrategy::new(MpcParams::default(), sp());
        assert_eq!(m.step(0.0), (ValveCommand::Hold, 0));
        assert_eq!(m.prev_control(), 0.0);
    }
}
