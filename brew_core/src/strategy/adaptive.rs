use serde::Serialize;

use super::pid::{PidGains, PidParams, PidState};
use super::{Setpoints, ValveCommand, invalid, positive};
use crate::error::BrewError;

/// Error magnitude above which a tick counts toward sustained error.
const SUSTAINED_ERROR: f64 = 0.01;
/// Ticks of sustained error before the gain factor starts to grow.
const SUSTAINED_TICKS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GainRegion {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveParams {
    pub low: PidGains,
    pub medium: PidGains,
    pub high: PidGains,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub adaptation_enabled: bool,
    pub adaptation_rate: f64,
    pub max_adaptation_factor: f64,
    /// Limits and actuation; `limits.gains` is unused.
    pub limits: PidParams,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            low: PidGains {
                kp: 0.5,
                ki: 0.05,
                kd: 0.02,
            },
            medium: PidGains {
                kp: 1.5,
                ki: 0.15,
                kd: 0.08,
            },
            high: PidGains {
                kp: 2.5,
                ki: 0.25,
                kd: 0.1,
            },
            low_threshold: 0.03,
            high_threshold: 0.07,
            adaptation_enabled: true,
            adaptation_rate: 0.01,
            max_adaptation_factor: 2.0,
            limits: PidParams::default(),
        }
    }
}

impl AdaptiveParams {
    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        self.low.validate("_low")?;
        self.medium.validate("_med")?;
        self.high.validate("_high")?;
        positive("flow_rate_low_threshold", self.low_threshold)?;
        positive("flow_rate_high_threshold", self.high_threshold)?;
        if self.low_threshold >= self.high_threshold {
            return Err(invalid(
                "flow_rate_low_threshold must be below flow_rate_high_threshold",
            ));
        }
        if !(self.adaptation_rate.is_finite()
            && self.adaptation_rate > 0.0
            && self.adaptation_rate <= 1.0)
        {
            return Err(invalid("adaptation_rate must be in (0, 1]"));
        }
        if !(self.max_adaptation_factor.is_finite() && self.max_adaptation_factor >= 1.0) {
            return Err(invalid("max_adaptation_factor must be >= 1"));
        }
        self.limits.validate_limits()
    }

    pub(crate) fn param_table(&self) -> Vec<(&'static str, String)> {
        let mut t = vec![
            ("kp_low", self.low.kp.to_string()),
            ("ki_low", self.low.ki.to_string()),
            ("kd_low", self.low.kd.to_string()),
            ("kp_med", self.medium.kp.to_string()),
            ("ki_med", self.medium.ki.to_string()),
            ("kd_med", self.medium.kd.to_string()),
            ("kp_high", self.high.kp.to_string()),
            ("ki_high", self.high.ki.to_string()),
            ("kd_high", self.high.kd.to_string()),
            ("flow_rate_low_threshold", self.low_threshold.to_string()),
            ("flow_rate_high_threshold", self.high_threshold.to_string()),
            ("adaptation_enabled", self.adaptation_enabled.to_string()),
            ("adaptation_rate", self.adaptation_rate.to_string()),
            ("max_adaptation_factor", self.max_adaptation_factor.to_string()),
        ];
        t.extend(self.limits.limit_table());
        t
    }

    pub fn region_for(&self, flow: f64) -> GainRegion {
        if flow < self.low_threshold {
            GainRegion::Low
        } else if flow > self.high_threshold {
            GainRegion::High
        } else {
            GainRegion::Medium
        }
    }

    fn base_gains(&self, region: GainRegion) -> &PidGains {
        match region {
            GainRegion::Low => &self.low,
            GainRegion::Medium => &self.medium,
            GainRegion::High => &self.high,
        }
    }
}

/// PID whose gains come from the flow region and are scaled up while the
/// error stays large.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveStrategy {
    params: AdaptiveParams,
    setpoints: Setpoints,
    pid: PidState,
    region: GainRegion,
    factor: f64,
    sustained: u32,
}

impl AdaptiveStrategy {
    pub fn new(params: AdaptiveParams, setpoints: Setpoints) -> Self {
        Self {
            params,
            setpoints,
            pid: PidState::default(),
            region: GainRegion::Medium,
            factor: 1.0,
            sustained: 0,
        }
    }

    pub fn region(&self) -> GainRegion {
        self.region
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn step(&mut self, flow: f64) -> (ValveCommand, u32) {
        let error = self.setpoints.target_flow_rate - flow;

        let region = self.params.region_for(flow);
        if region != self.region {
            tracing::debug!(from = ?self.region, to = ?region, "gain region changed");
            self.region = region;
            self.factor = 1.0;
            self.sustained = 0;
        }

        if self.params.adaptation_enabled {
            let rate = self.params.adaptation_rate;
            if error.abs() > SUSTAINED_ERROR {
                self.sustained += 1;
                if self.sustained > SUSTAINED_TICKS {
                    self.factor = (self.factor + rate).min(self.params.max_adaptation_factor);
                }
            } else {
                self.sustained = 0;
                self.factor = (self.factor - 2.0 * rate).max(1.0);
            }
        }

        let gains = self.params.base_gains(self.region).scaled(self.factor);
        let out = self.pid.update(
            &gains,
            self.params.limits.integral_limit,
            error,
            self.setpoints.dt_s,
        );
        self.params.limits.actuation.command(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strat(params: AdaptiveParams) -> AdaptiveStrategy {
        AdaptiveStrategy::new(
            params,
            Setpoints {
                target_flow_rate: 0.05,
                epsilon: 0.008,
                dt_s: 60.0,
            },
        )
    }

    #[test]
    fn regions_follow_thresholds() {
        let p = AdaptiveParams::default();
        assert_eq!(p.region_for(0.01), GainRegion::Low);
        assert_eq!(p.region_for(0.03), GainRegion::Medium);
        assert_eq!(p.region_for(0.07), GainRegion::Medium);
        assert_eq!(p.region_for(0.09), GainRegion::High);
    }

    #[test]
    fn factor_grows_only_after_sustained_error() {
        let mut s = strat(AdaptiveParams::default());
        // 0.035 is in the medium band, error 0.015
        for _ in 0..5 {
            s.step(0.035);
            assert_eq!(s.factor(), 1.0);
        }
        s.step(0.035);
        assert!((s.factor() - 1.01).abs() < 1e-12);
    }

    #[test]
    fn adaptation_rate_above_one_is_rejected() {
        let p = AdaptiveParams {
            adaptation_rate: 1.5,
            ..AdaptiveParams::default()
        };
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("adaptation_rate"), "{err}");
    }

    #[test]
    fn factor_is_capped() {
        let mut s = strat(AdaptiveParams {
            adaptation_rate: 0.5,
            ..AdaptiveParams::default()
        });
        for _ in 0..20 {
            s.step(0.035);
        }
        assert_eq!(s.factor(), 2.0);
    }

    #[test]
    fn small_error_decays_factor_to_one() {
        let mut s = strat(AdaptiveParams {
            adaptation_rate: 0.1,
            ..AdaptiveParams::default()
        });
        for _ in 0..8 {
            s.step(0.035);
        }
        assert!(s.factor() > 1.0);
        for _ in 0..10 {
            s.step(0.05);
        }
        assert_eq!(s.factor(), 1.0);
    }

    #[test]
    fn region_change_resets_adaptation() {
        let mut s = strat(AdaptiveParams::default());
        for _ in 0..8 {
            s.step(0.035);
        }
        assert!(s.factor() > 1.0);
        s.step(0.01);
        assert_eq!(s.region(), GainRegion::Low);
        assert_eq!(s.factor(), 1.0);
    }

    #[test]
    fn disabled_adaptation_keeps_factor() {
        let mut s = strat(AdaptiveParams {
            adaptation_enabled: false,
            ..AdaptiveParams::default()
        });
        for _ in 0..20 {
            s.step(0.035);
        }
        assert_eq!(s.factor(), 1.0);
    }
}
