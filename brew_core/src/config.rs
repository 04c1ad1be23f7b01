//! Runtime configuration of the engine loops.
//!
//! These are the structs `SessionManager` runs on. They are separate from the
//! TOML-deserialized config in `brew_config`; see `conversions`.

use std::time::Duration;

use crate::estimator::EstimatorMethod;

/// How the sampling and control loops are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheduling {
    /// One background thread per loop, started with the brew.
    #[default]
    Threads,
    /// No threads; the caller drives `sample_tick` / `control_tick`.
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineCfg {
    /// Period of the sampling loop while the scale answers.
    pub sample_interval: Duration,
    /// Consecutive failed scale reads before a live brew enters Error.
    pub max_scale_failures: u32,
    /// Upper bound of the read backoff.
    pub backoff_cap: Duration,
    /// A weight drop larger than this while brewing is logged.
    pub weight_noise_tolerance_g: f64,
    /// Battery level at which a warning is logged once per brew.
    pub low_battery_pct: u8,
    /// Consecutive store failures before a live brew enters Error.
    pub max_store_failures: u32,
    pub estimator: EstimatorMethod,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            max_scale_failures: 3,
            backoff_cap: Duration::from_secs(8),
            weight_noise_tolerance_g: 2.0,
            low_battery_pct: 15,
            max_store_failures: 5,
            estimator: EstimatorMethod::Endpoints,
        }
    }
}
