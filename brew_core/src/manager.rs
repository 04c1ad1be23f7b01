//! The session manager: single owner of the valve and of the brew lifecycle.
//!
//! Lock order is `loops` then `core`. The loop bodies take their gate, then
//! the scale or store, then `core`, and never hold `core` while calling the
//! scale or the store. `kill` bumps the generation under `core` before joining
//! the loop threads, so an in-flight tick that re-locks `core` sees it and
//! drops its result.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use brew_traits::{Clock, Direction, FlowStore, Scale, Valve};
use chrono::{DateTime, Utc};

use crate::builder::{Missing, SessionManagerBuilder};
use crate::config::{EngineCfg, Scheduling};
use crate::error::{BrewError, FaultRecord, Report, Result};
use crate::estimator::FlowEstimator;
use crate::hw_error::map_hw_error;
use crate::runner::{PeriodicTask, Tick};
use crate::session::{BrewConfig, BrewSession, BrewState, SessionId};
use crate::strategy::Strategy;
use crate::util::{lock, path_to, wrap_position};

/// The live brew plus everything the loops keep between ticks.
pub(crate) struct Active {
    pub(crate) session: BrewSession,
    pub(crate) strategy: Strategy,
    pub(crate) config: BrewConfig,
    pub(crate) start_position: u8,
    pub(crate) scale_failures: u32,
    pub(crate) store_write_failures: u32,
    pub(crate) store_query_failures: u32,
    pub(crate) low_battery_warned: bool,
}

pub(crate) struct Core {
    pub(crate) valve: Box<dyn Valve + Send>,
    /// Valve ownership slot. `Some` exactly while a brew is Brewing or Paused.
    pub(crate) owner: Option<SessionId>,
    pub(crate) active: Option<Active>,
    /// Bumped on every start and kill; ticks from an older generation are discarded.
    pub(crate) generation: u64,
}

impl Core {
    /// Step the valve on behalf of brew `id` and track its position.
    pub(crate) fn apply_valve(
        &mut self,
        id: SessionId,
        direction: Direction,
        count: u32,
    ) -> std::result::Result<(), BrewError> {
        if self.owner != Some(id) {
            return Err(BrewError::NotOwner);
        }
        let Some(active) = self.active.as_mut().filter(|a| a.session.id == id) else {
            return Err(BrewError::NotOwner);
        };
        if count == 0 {
            return Ok(());
        }
        self.valve
            .step(direction, count)
            .map_err(|e| map_hw_error(&*e))?;
        let session = &mut active.session;
        session.valve_position = wrap_position(session.valve_position, direction, count);
        session.valve_steps += u64::from(count);
        let reported = self.valve.position();
        if reported != session.valve_position {
            tracing::warn!(
                session = %id,
                tracked = session.valve_position,
                reported,
                "valve position disagrees with tracked position"
            );
        }
        Ok(())
    }

    fn release_valve(&mut self) {
        if let Err(e) = self.valve.release() {
            tracing::warn!(error = %e, "valve release failed");
        }
        self.owner = None;
    }

    /// Move the live brew to Error and give up the valve.
    pub(crate) fn enter_error(&mut self, fault: FaultRecord) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        tracing::error!(
            session = %active.session.id,
            category = ?fault.category,
            severity = ?fault.severity,
            retryable = fault.retryable,
            message = %fault.message,
            "brew entered error"
        );
        active.session.state = BrewState::Error;
        active.session.error = Some(fault);
        self.release_valve();
    }

    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let session = &mut active.session;
        session.state = BrewState::Completed;
        session.time_completed = Some(now.max(session.time_started));
        tracing::info!(
            session = %session.id,
            weight = ?session.current_weight,
            target = session.target_weight,
            steps = session.valve_steps,
            "brew complete"
        );
        self.release_valve();
    }
}

pub(crate) struct Shared {
    pub(crate) core: Mutex<Core>,
    pub(crate) scale: Mutex<Box<dyn Scale + Send>>,
    pub(crate) store: Mutex<Box<dyn FlowStore + Send>>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) engine: EngineCfg,
    pub(crate) estimator: FlowEstimator,
    /// Keeps ticks of one loop from overlapping when driven externally.
    pub(crate) sample_gate: Mutex<()>,
    pub(crate) control_gate: Mutex<()>,
}

/// Runs at most one brew at a time against one scale, valve and store.
pub struct SessionManager {
    pub(crate) shared: Arc<Shared>,
    pub(crate) loops: Mutex<Vec<PeriodicTask>>,
    pub(crate) scheduling: Scheduling,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("scheduling", &self.scheduling)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder<Missing, Missing, Missing> {
        SessionManagerBuilder::default()
    }

    pub fn engine(&self) -> &EngineCfg {
        &self.shared.engine
    }

    /// Start a brew. Fails with `Conflict` while another brew is live and with
    /// `InvalidState` while the last brew sits in Error.
    pub fn start(&self, config: BrewConfig) -> Result<SessionId> {
        config.validate().map_err(Report::new)?;

        let mut loops = lock(&self.loops);
        {
            let core = lock(&self.shared.core);
            if let Some(active) = &core.active {
                match active.session.state {
                    BrewState::Brewing | BrewState::Paused => {
                        return Err(Report::new(BrewError::Conflict(active.session.id)));
                    }
                    BrewState::Error => {
                        return Err(Report::new(BrewError::InvalidState {
                            op: "start",
                            state: BrewState::Error,
                        }));
                    }
                    BrewState::Idle | BrewState::Completed => {}
                }
            }
        }
        // Loops of a completed brew have stopped or are about to.
        for mut task in loops.drain(..) {
            task.stop();
        }

        let (id, generation) = {
            let mut core = lock(&self.shared.core);
            if let Some(owner) = core.owner {
                tracing::error!(session = %owner, "valve owned with no live brew");
                panic!("valve still owned by brew {owner} with no live brew");
            }
            core.generation += 1;
            let id = SessionId::new();
            let position = core.valve.position();
            let session = BrewSession::new(id, &config, position, self.shared.clock.utc_now());
            let strategy = Strategy::new(&config.strategy, config.setpoints());
            tracing::info!(
                session = %id,
                strategy = %strategy.kind(),
                target_flow_rate = config.target_flow_rate,
                target_weight = config.target_weight,
                valve_interval_s = config.valve_interval.as_secs_f64(),
                position,
                "brew start"
            );
            core.owner = Some(id);
            core.active = Some(Active {
                session,
                strategy,
                start_position: position,
                config,
                scale_failures: 0,
                store_write_failures: 0,
                store_query_failures: 0,
                low_battery_warned: false,
            });
            (id, core.generation)
        };

        if self.scheduling == Scheduling::Threads {
            match self.spawn_loops(generation) {
                Ok(tasks) => loops.extend(tasks),
                Err(e) => {
                    let mut core = lock(&self.shared.core);
                    core.generation += 1;
                    core.active = None;
                    core.release_valve();
                    return Err(Report::new(e).wrap_err("failed to spawn brew loops"));
                }
            }
        }
        Ok(id)
    }

    fn spawn_loops(&self, generation: u64) -> std::io::Result<Vec<PeriodicTask>> {
        let shared = Arc::clone(&self.shared);
        let sampler = PeriodicTask::spawn("brew-sampler", Duration::ZERO, move || {
            shared.sample_tick(generation)
        })?;
        let shared = Arc::clone(&self.shared);
        let control = PeriodicTask::spawn("brew-control", Duration::ZERO, move || {
            shared.control_tick(generation)
        })?;
        Ok(vec![sampler, control])
    }

    /// Stop everything and go back to Idle. Safe to call at any time, repeatedly.
    pub fn kill(&self) {
        let mut loops = lock(&self.loops);
        {
            let mut core = lock(&self.shared.core);
            core.generation += 1;
            if let Some(active) = core.active.take() {
                let id = active.session.id;
                if core.owner == Some(id) {
                    if active.config.return_to_start_on_kill
                        && let Some((direction, count)) =
                            path_to(active.session.valve_position, active.start_position)
                    {
                        match core.valve.step(direction, count) {
                            Ok(()) => tracing::info!(
                                session = %id,
                                position = active.start_position,
                                "valve returned to start"
                            ),
                            Err(e) => tracing::warn!(
                                session = %id,
                                error = %e,
                                "valve return to start failed"
                            ),
                        }
                    }
                    core.release_valve();
                }
                tracing::info!(session = %id, state = %active.session.state, "brew killed");
            }
        }
        for mut task in loops.drain(..) {
            task.stop();
        }
    }

    pub fn pause(&self) -> Result<()> {
        let mut core = lock(&self.shared.core);
        let active = core
            .active
            .as_mut()
            .ok_or_else(|| Report::new(BrewError::NoSession))?;
        match active.session.state {
            BrewState::Brewing => {
                active.session.state = BrewState::Paused;
                tracing::info!(session = %active.session.id, "brew paused");
                Ok(())
            }
            BrewState::Paused => Ok(()),
            state => Err(Report::new(BrewError::InvalidState { op: "pause", state })),
        }
    }

    pub fn resume(&self) -> Result<()> {
        let mut core = lock(&self.shared.core);
        let active = core
            .active
            .as_mut()
            .ok_or_else(|| Report::new(BrewError::NoSession))?;
        match active.session.state {
            BrewState::Paused => {
                active.session.state = BrewState::Brewing;
                tracing::info!(session = %active.session.id, "brew resumed");
                Ok(())
            }
            BrewState::Brewing => Ok(()),
            state => Err(Report::new(BrewError::InvalidState { op: "resume", state })),
        }
    }

    /// One manual step toward open. Only while Brewing.
    pub fn nudge_open(&self) -> Result<()> {
        self.nudge(Direction::Forward)
    }

    /// One manual step toward closed. Only while Brewing.
    pub fn nudge_close(&self) -> Result<()> {
        self.nudge(Direction::Backward)
    }

    fn nudge(&self, direction: Direction) -> Result<()> {
        let mut core = lock(&self.shared.core);
        let (id, state) = match core.active.as_ref() {
            Some(a) => (a.session.id, a.session.state),
            None => return Err(Report::new(BrewError::NoSession)),
        };
        if state != BrewState::Brewing {
            return Err(Report::new(BrewError::InvalidState { op: "nudge", state }));
        }
        match core.apply_valve(id, direction, 1) {
            Ok(()) => {
                tracing::info!(session = %id, ?direction, "valve nudged");
                Ok(())
            }
            Err(e) => {
                let now = self.shared.clock.utc_now();
                core.enter_error(FaultRecord::valve_failed(&e, now));
                Err(Report::new(e))
            }
        }
    }

    /// Current brew, `None` when Idle.
    pub fn snapshot(&self) -> Option<BrewSession> {
        lock(&self.shared.core)
            .active
            .as_ref()
            .map(|a| a.session.clone())
    }

    pub fn state(&self) -> BrewState {
        lock(&self.shared.core)
            .active
            .as_ref()
            .map_or(BrewState::Idle, |a| a.session.state)
    }

    /// Run one sampling iteration now. For `Scheduling::External`.
    pub fn sample_tick(&self) -> Tick {
        let generation = lock(&self.shared.core).generation;
        self.shared.sample_tick(generation)
    }

    /// Run one control iteration now. For `Scheduling::External`.
    pub fn control_tick(&self) -> Tick {
        let generation = lock(&self.shared.core).generation;
        self.shared.control_tick(generation)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.kill();
    }
}
