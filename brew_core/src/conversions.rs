//! `From` implementations bridging `brew_config` types to `brew_core` types.
//!
//! Parameters left out of the TOML (`None`) take the engine defaults.

use std::time::Duration;

use eyre::WrapErr;

use crate::config::EngineCfg;
use crate::estimator::EstimatorMethod;
use crate::session::BrewConfig;
use crate::strategy::{
    Actuation, AdaptiveParams, FirstOrderPlant, KalmanParams, KalmanPidParams, MpcParams,
    PidGains, PidParams, SmithParams, StrategyConfig,
};

// ── Shared pieces ────────────────────────────────────────────────────────────

fn gains(kp: Option<f64>, ki: Option<f64>, kd: Option<f64>, base: PidGains) -> PidGains {
    PidGains {
        kp: kp.unwrap_or(base.kp),
        ki: ki.unwrap_or(base.ki),
        kd: kd.unwrap_or(base.kd),
    }
}

fn actuation(output_limit: Option<f64>, deadband: Option<f64>, max_steps: Option<u32>) -> Actuation {
    let d = Actuation::default();
    Actuation {
        output_limit: output_limit.unwrap_or(d.output_limit),
        deadband: deadband.unwrap_or(d.deadband),
        max_steps: max_steps.unwrap_or(d.max_steps),
    }
}

fn limits(
    integral_limit: Option<f64>,
    output_limit: Option<f64>,
    deadband: Option<f64>,
    max_steps: Option<u32>,
) -> PidParams {
    let d = PidParams::default();
    PidParams {
        gains: d.gains,
        integral_limit: integral_limit.unwrap_or(d.integral_limit),
        actuation: actuation(output_limit, deadband, max_steps),
    }
}

fn kalman(q: Option<f64>, r: Option<f64>) -> KalmanParams {
    let d = KalmanParams::default();
    KalmanParams {
        q: q.unwrap_or(d.q),
        r: r.unwrap_or(d.r),
    }
}

fn plant(gain: Option<f64>, time_constant: Option<f64>) -> FirstOrderPlant {
    let d = FirstOrderPlant::default();
    FirstOrderPlant {
        gain: gain.unwrap_or(d.gain),
        time_constant: time_constant.unwrap_or(d.time_constant),
    }
}

// ── Strategies ───────────────────────────────────────────────────────────────

impl From<&brew_config::PidCfg> for PidParams {
    fn from(c: &brew_config::PidCfg) -> Self {
        let mut p = limits(c.integral_limit, c.output_limit, c.deadband, c.max_steps);
        p.gains = gains(c.kp, c.ki, c.kd, PidGains::default());
        p
    }
}

impl From<&brew_config::KalmanPidCfg> for KalmanPidParams {
    fn from(c: &brew_config::KalmanPidCfg) -> Self {
        let mut pid = limits(c.integral_limit, c.output_limit, c.deadband, c.max_steps);
        pid.gains = gains(c.kp, c.ki, c.kd, PidGains::default());
        Self {
            pid,
            kalman: kalman(c.q, c.r),
        }
    }
}

impl From<&brew_config::SmithCfg> for SmithParams {
    fn from(c: &brew_config::SmithCfg) -> Self {
        let d = SmithParams::default();
        let mut pid = limits(c.integral_limit, c.output_limit, c.deadband, c.max_steps);
        pid.gains = gains(c.kp, c.ki, c.kd, d.pid.gains);
        Self {
            pid,
            dead_time: c.dead_time.unwrap_or(d.dead_time),
            plant: plant(c.plant_gain, c.plant_time_constant),
            kalman: kalman(c.q, c.r),
        }
    }
}

impl From<&brew_config::AdaptiveCfg> for AdaptiveParams {
    fn from(c: &brew_config::AdaptiveCfg) -> Self {
        let d = AdaptiveParams::default();
        Self {
            low: gains(c.kp_low, c.ki_low, c.kd_low, d.low),
            medium: gains(c.kp_med, c.ki_med, c.kd_med, d.medium),
            high: gains(c.kp_high, c.ki_high, c.kd_high, d.high),
            low_threshold: c.flow_rate_low_threshold.unwrap_or(d.low_threshold),
            high_threshold: c.flow_rate_high_threshold.unwrap_or(d.high_threshold),
            adaptation_enabled: c.adaptation_enabled.unwrap_or(d.adaptation_enabled),
            adaptation_rate: c.adaptation_rate.unwrap_or(d.adaptation_rate),
            max_adaptation_factor: c.max_adaptation_factor.unwrap_or(d.max_adaptation_factor),
            limits: limits(c.integral_limit, c.output_limit, c.deadband, c.max_steps),
        }
    }
}

impl From<&brew_config::MpcCfg> for MpcParams {
    fn from(c: &brew_config::MpcCfg) -> Self {
        let d = MpcParams::default();
        Self {
            horizon: c.horizon.unwrap_or(d.horizon),
            plant: plant(c.plant_gain, c.plant_time_constant),
            q_error: c.q_error.unwrap_or(d.q_error),
            q_control: c.q_control.unwrap_or(d.q_control),
            q_delta: c.q_delta.unwrap_or(d.q_delta),
            actuation: actuation(c.output_limit, c.deadband, c.max_steps),
        }
    }
}

impl From<&brew_config::StrategyCfg> for StrategyConfig {
    fn from(c: &brew_config::StrategyCfg) -> Self {
        use brew_config::StrategyCfg as C;
        match c {
            C::Default => StrategyConfig::Default,
            C::Pid(p) => StrategyConfig::Pid(p.into()),
            C::KalmanPid(p) => StrategyConfig::KalmanPid(p.into()),
            C::SmithPredictor(p) => StrategyConfig::SmithPredictor(p.into()),
            C::AdaptiveGainScheduling(p) => StrategyConfig::AdaptiveGainScheduling(p.into()),
            C::Mpc(p) => StrategyConfig::Mpc(p.into()),
        }
    }
}

// ── Brew and engine ──────────────────────────────────────────────────────────

impl TryFrom<&brew_config::Config> for BrewConfig {
    type Error = eyre::Report;

    fn try_from(c: &brew_config::Config) -> Result<Self, Self::Error> {
        let strategy = c.strategy.typed()?;
        let valve_interval = Duration::try_from_secs_f64(c.brew.valve_interval_s)
            .wrap_err("brew.valve_interval_s is not a valid duration")?;
        Ok(Self {
            target_flow_rate: c.brew.target_flow_rate,
            valve_interval,
            epsilon: c.brew.epsilon,
            target_weight: c.brew.target_weight_g,
            strategy: (&strategy).into(),
            return_to_start_on_kill: c.brew.return_to_start_on_kill,
        })
    }
}

impl From<brew_config::EstimatorKind> for EstimatorMethod {
    fn from(k: brew_config::EstimatorKind) -> Self {
        match k {
            brew_config::EstimatorKind::Endpoints => EstimatorMethod::Endpoints,
            brew_config::EstimatorKind::LinearFit => EstimatorMethod::LinearFit,
        }
    }
}

impl From<&brew_config::Config> for EngineCfg {
    fn from(c: &brew_config::Config) -> Self {
        Self {
            sample_interval: Duration::from_millis(c.sampling.interval_ms),
            max_scale_failures: c.sampling.max_consecutive_failures,
            backoff_cap: Duration::from_millis(c.sampling.backoff_cap_ms),
            weight_noise_tolerance_g: c.sampling.weight_noise_tolerance_g,
            low_battery_pct: c.sampling.low_battery_pct,
            max_store_failures: c.store.max_consecutive_failures,
            estimator: c.sampling.estimator.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_params_take_engine_defaults() {
        let cfg = brew_config::load_toml(
            r#"
            [strategy]
            kind = "pid"
            [strategy.params]
            kp = 2.0
            "#,
        )
        .unwrap();
        let brew = BrewConfig::try_from(&cfg).unwrap();
        let StrategyConfig::Pid(p) = brew.strategy else {
            panic!("expected pid, got {:?}", brew.strategy);
        };
        assert_eq!(p.gains.kp, 2.0);
        assert_eq!(p.gains.ki, PidGains::default().ki);
        assert_eq!(p.actuation, Actuation::default());
    }

    #[test]
    fn adaptive_sections_map_to_regions() {
        let cfg = brew_config::load_toml(
            r#"
            [strategy]
            kind = "adaptive_gain_scheduling"
            [strategy.params]
            kp_high = 4.0
            adaptation_enabled = false
            "#,
        )
        .unwrap();
        let StrategyConfig::AdaptiveGainScheduling(p) = BrewConfig::try_from(&cfg).unwrap().strategy
        else {
            panic!("expected adaptive");
        };
        assert_eq!(p.high.kp, 4.0);
        assert_eq!(p.medium, AdaptiveParams::default().medium);
        assert!(!p.adaptation_enabled);
    }

    #[test]
    fn engine_cfg_from_sections() {
        let cfg = brew_config::load_toml(
            r#"
            [sampling]
            interval_ms = 250
            estimator = "linear_fit"
            [store]
            max_consecutive_failures = 2
            "#,
        )
        .unwrap();
        let e = EngineCfg::from(&cfg);
        assert_eq!(e.sample_interval, Duration::from_millis(250));
        assert_eq!(e.estimator, EstimatorMethod::LinearFit);
        assert_eq!(e.max_store_failures, 2);
    }
}
