//! Type-state builder for `SessionManager`.
//!
//! The builder enforces at compile time that a scale, a valve and a flow store
//! are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use brew_traits::{Clock, FlowStore, MonotonicClock, Scale, Valve};

use crate::config::{EngineCfg, Scheduling};
use crate::error::{BuildError, Result};
use crate::estimator::FlowEstimator;
use crate::manager::{Core, SessionManager, Shared};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `SessionManager`. The engine config is validated on `build()`.
pub struct SessionManagerBuilder<S, V, T> {
    scale: Option<Box<dyn Scale + Send>>,
    valve: Option<Box<dyn Valve + Send>>,
    store: Option<Box<dyn FlowStore + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    engine: Option<EngineCfg>,
    scheduling: Scheduling,
    _s: PhantomData<S>,
    _v: PhantomData<V>,
    _t: PhantomData<T>,
}

impl Default for SessionManagerBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            scale: None,
            valve: None,
            store: None,
            clock: None,
            engine: None,
            scheduling: Scheduling::Threads,
            _s: PhantomData,
            _v: PhantomData,
            _t: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> Result<()> {
    Err(eyre::Report::new(BuildError::InvalidConfig(msg)))
}

fn validate_engine(engine: &EngineCfg) -> Result<()> {
    if engine.sample_interval.is_zero() {
        return invalid("sample_interval must be > 0");
    }
    if engine.backoff_cap < engine.sample_interval {
        return invalid("backoff_cap must be >= sample_interval");
    }
    if engine.max_scale_failures == 0 {
        return invalid("max_scale_failures must be >= 1");
    }
    if engine.max_store_failures == 0 {
        return invalid("max_store_failures must be >= 1");
    }
    if !(engine.weight_noise_tolerance_g.is_finite() && engine.weight_noise_tolerance_g >= 0.0) {
        return invalid("weight_noise_tolerance_g must be >= 0");
    }
    if engine.low_battery_pct > 100 {
        return invalid("low_battery_pct must be in [0, 100]");
    }
    Ok(())
}

impl<S, V, T> SessionManagerBuilder<S, V, T> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<SessionManager> {
        let scale = self
            .scale
            .ok_or_else(|| eyre::Report::new(BuildError::MissingScale))?;
        let valve = self
            .valve
            .ok_or_else(|| eyre::Report::new(BuildError::MissingValve))?;
        let store = self
            .store
            .ok_or_else(|| eyre::Report::new(BuildError::MissingStore))?;
        let engine = self.engine.unwrap_or_default();
        validate_engine(&engine)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let estimator = FlowEstimator::new(engine.estimator);

        Ok(SessionManager {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    valve,
                    owner: None,
                    active: None,
                    generation: 0,
                }),
                scale: Mutex::new(scale),
                store: Mutex::new(store),
                clock,
                engine,
                estimator,
                sample_gate: Mutex::new(()),
                control_gate: Mutex::new(()),
            }),
            loops: Mutex::new(Vec::new()),
            scheduling: self.scheduling,
        })
    }
}

/// Chainable setters that do not affect type-state.
impl<S, V, T> SessionManagerBuilder<S, V, T> {
    /// Provide a custom clock implementation; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
    pub fn with_engine(mut self, engine: EngineCfg) -> Self {
        self.engine = Some(engine);
        self
    }
    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }
}

// Setters that advance type-state
impl<V, T> SessionManagerBuilder<Missing, V, T> {
    pub fn with_scale(
        self,
        scale: impl Scale + Send + 'static,
    ) -> SessionManagerBuilder<Set, V, T> {
        SessionManagerBuilder {
            scale: Some(Box::new(scale)),
            valve: self.valve,
            store: self.store,
            clock: self.clock,
            engine: self.engine,
            scheduling: self.scheduling,
            _s: PhantomData,
            _v: PhantomData,
            _t: PhantomData,
        }
    }
}

impl<S, T> SessionManagerBuilder<S, Missing, T> {
    pub fn with_valve(
        self,
        valve: impl Valve + Send + 'static,
    ) -> SessionManagerBuilder<S, Set, T> {
        SessionManagerBuilder {
            scale: self.scale,
            valve: Some(Box::new(valve)),
            store: self.store,
            clock: self.clock,
            engine: self.engine,
            scheduling: self.scheduling,
            _s: PhantomData,
            _v: PhantomData,
            _t: PhantomData,
        }
    }
}

impl<S, V> SessionManagerBuilder<S, V, Missing> {
    pub fn with_store(
        self,
        store: impl FlowStore + Send + 'static,
    ) -> SessionManagerBuilder<S, V, Set> {
        SessionManagerBuilder {
            scale: self.scale,
            valve: self.valve,
            store: Some(Box::new(store)),
            clock: self.clock,
            engine: self.engine,
            scheduling: self.scheduling,
            _s: PhantomData,
            _v: PhantomData,
            _t: PhantomData,
        }
    }
}

impl SessionManagerBuilder<Set, Set, Set> {
    /// Validate and build. Only available once scale, valve and store are set.
    pub fn build(self) -> Result<SessionManager> {
        self.try_build()
    }
}
