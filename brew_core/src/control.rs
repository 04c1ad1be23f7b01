//! Control loop body: estimate, decide, actuate.

use crate::error::FaultRecord;
use crate::manager::Shared;
use crate::runner::Tick;
use crate::session::BrewState;
use crate::util::lock;

impl Shared {
    pub(crate) fn control_tick(&self, generation: u64) -> Tick {
        let _gate = lock(&self.control_gate);
        let (id, window) = {
            let core = lock(&self.core);
            if core.generation != generation {
                return Tick::Stop;
            }
            match core.active.as_ref() {
                Some(a) if a.session.state.is_live() => (a.session.id, a.config.valve_interval),
                _ => return Tick::Stop,
            }
        };

        let now = self.clock.utc_now();
        let estimate = {
            let store = lock(&self.store);
            self.estimator.estimate(&**store, window, now)
        };

        let mut core = lock(&self.core);
        if core.generation != generation {
            tracing::debug!(session = %id, "dropping control tick of a killed brew");
            return Tick::Stop;
        }
        let Some(active) = core
            .active
            .as_mut()
            .filter(|a| a.session.id == id && a.session.state.is_live())
        else {
            return Tick::Stop;
        };

        let flow = match estimate {
            Ok(flow) => {
                active.store_query_failures = 0;
                flow
            }
            Err(e) => {
                active.store_query_failures = active.store_query_failures.saturating_add(1);
                tracing::warn!(
                    session = %id,
                    failures = active.store_query_failures,
                    error = %e,
                    "flow query failed"
                );
                if active.store_query_failures >= self.engine.max_store_failures {
                    let fault = FaultRecord::store_failing(active.store_query_failures, &e, now);
                    core.enter_error(fault);
                    return Tick::Stop;
                }
                None
            }
        };

        active.session.current_flow_rate = flow;
        let weight = active.session.current_weight;
        let state = active.session.state;
        let (command, steps) = active.strategy.step(flow, weight);
        tracing::info!(
            session = %id,
            flow = ?flow,
            weight = ?weight,
            ?command,
            steps,
            %state,
            "control tick"
        );

        if state == BrewState::Brewing
            && steps > 0
            && let Some(direction) = command.direction()
            && let Err(e) = core.apply_valve(id, direction, steps)
        {
            core.enter_error(FaultRecord::valve_failed(&e, now));
            return Tick::Stop;
        }
        Tick::Continue(window)
    }
}
