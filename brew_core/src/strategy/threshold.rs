use super::{Setpoints, ValveCommand};

/// Absorbs float error so that a flow of exactly `target ± epsilon` counts as in band.
const BOUNDARY_TOLERANCE: f64 = 1e-12;

/// Bang-bang control with a dead zone of `± epsilon` around the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdStrategy {
    target: f64,
    epsilon: f64,
}

impl ThresholdStrategy {
    pub fn new(sp: Setpoints) -> Self {
        Self {
            target: sp.target_flow_rate,
            epsilon: sp.epsilon,
        }
    }

    pub fn step(&mut self, flow: f64) -> (ValveCommand, u32) {
        let diff = self.target - flow;
        if diff.abs() <= self.epsilon + BOUNDARY_TOLERANCE {
            (ValveCommand::Hold, 0)
        } else if diff > 0.0 {
            (ValveCommand::Forward, 1)
        } else {
            (ValveCommand::Backward, 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn strat() -> ThresholdStrategy {
        ThresholdStrategy::new(Setpoints {
            target_flow_rate: 0.05,
            epsilon: 0.008,
            dt_s: 60.0,
        })
    }

    #[rstest]
    #[case(0.05, ValveCommand::Hold, 0)]
    #[case(0.05 - 0.008, ValveCommand::Hold, 0)]
    #[case(0.05 + 0.008, ValveCommand::Hold, 0)]
    #[case(0.05 - 0.008 - 1e-6, ValveCommand::Forward, 1)]
    #[case(0.05 + 0.008 + 1e-6, ValveCommand::Backward, 1)]
    #[case(0.0, ValveCommand::Forward, 1)]
    #[case(0.2, ValveCommand::Backward, 1)]
    fn boundaries(#[case] flow: f64, #[case] cmd: ValveCommand, #[case] n: u32) {
        assert_eq!(strat().step(flow), (cmd, n));
    }
}
