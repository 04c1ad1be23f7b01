#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::must_use_candidate
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Brew control engine (hardware-agnostic).
//!
//! All hardware interactions go through the `brew_traits::Scale`,
//! `brew_traits::Valve` and `brew_traits::FlowStore` ports.
//!
//! ## Architecture
//!
//! - **Session**: lifecycle state machine and the public snapshot (`session`)
//! - **Manager**: single owner of the valve; start/pause/resume/kill/nudge (`manager`)
//! - **Loops**: sampling (`sampler`) and control (`control`) bodies run by
//!   `runner::PeriodicTask` threads, or ticked by the caller
//! - **Estimation**: flow rate from windowed weight samples (`estimator`)
//! - **Strategies**: threshold, PID, Kalman PID, Smith predictor, adaptive
//!   gain scheduling and MPC (`strategy`)
//! - **Errors**: typed errors and structured fault records (`error`)
//!
//! ## Timing
//!
//! Strategies see time only through the fixed valve interval. Timestamps on
//! samples and sessions come from the injected `Clock`, so a `ManualClock`
//! plus `Scheduling::External` runs a whole brew deterministically.

pub mod builder;
pub mod config;
mod control;
pub mod conversions;
pub mod error;
pub mod estimator;
pub mod hw_error;
pub mod manager;
pub mod mocks;
pub mod runner;
mod sampler;
pub mod session;
pub mod strategy;
pub mod util;

pub use builder::SessionManagerBuilder;
pub use config::{EngineCfg, Scheduling};
pub use error::{BrewError, BuildError, FaultCategory, FaultRecord, Report, Result, Severity};
pub use estimator::{EstimatorMethod, FlowEstimator};
pub use manager::SessionManager;
pub use runner::Tick;
pub use session::{BrewConfig, BrewSession, BrewState, SessionId};
pub use strategy::{Strategy, StrategyConfig, StrategyKind, ValveCommand};
