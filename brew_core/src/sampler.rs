//! Sampling loop body.
//!
//! Reads the scale, appends the reading to the store and folds it into the
//! live brew. Read failures back off exponentially and, after
//! `max_scale_failures` in a row, move a live brew to Error. The loop keeps
//! running in Error so the snapshot can show the scale coming back; it stops
//! once the brew completes or is killed.

use brew_traits::FlowSample;

use crate::error::{BrewError, FaultCategory, FaultRecord};
use crate::hw_error::map_hw_error;
use crate::manager::Shared;
use crate::runner::Tick;
use crate::session::BrewState;
use crate::util::{backoff_delay, lock};

impl Shared {
    pub(crate) fn sample_tick(&self, generation: u64) -> Tick {
        let _gate = lock(&self.sample_gate);
        {
            let core = lock(&self.core);
            if core.generation != generation {
                return Tick::Stop;
            }
            match core.active.as_ref().map(|a| a.session.state) {
                None | Some(BrewState::Completed) => return Tick::Stop,
                Some(_) => {}
            }
        }

        let now = self.clock.utc_now();
        let (reading, battery) = {
            let mut scale = lock(&self.scale);
            if scale.connected() {
                let r = scale.read_weight().map_err(|e| map_hw_error(&*e));
                let battery = if r.is_ok() { scale.battery_pct() } else { None };
                (r, battery)
            } else {
                (Err(BrewError::Disconnected), None)
            }
        };
        let reading = reading.and_then(|w| {
            if w.is_finite() {
                Ok(w)
            } else {
                Err(BrewError::Hardware(format!("non-finite weight {w}")))
            }
        });
        let write = reading.as_ref().ok().map(|&w| {
            lock(&self.store)
                .write(FlowSample::new(now, w))
                .map_err(|e| BrewError::Store(e.to_string()))
        });

        let mut core = lock(&self.core);
        if core.generation != generation {
            return Tick::Stop;
        }
        let engine = &self.engine;
        let Some(active) = core.active.as_mut() else {
            return Tick::Stop;
        };
        let id = active.session.id;
        let state = active.session.state;
        let mut fault = None;

        match reading {
            Ok(weight) => {
                if active.scale_failures > 0 {
                    tracing::info!(session = %id, failures = active.scale_failures, "scale reads recovered");
                }
                active.scale_failures = 0;
                if state == BrewState::Brewing
                    && let Some(prev) = active.session.current_weight
                    && prev - weight > engine.weight_noise_tolerance_g
                {
                    tracing::warn!(session = %id, prev, weight, "weight dropped while brewing");
                }
                active.session.current_weight = Some(weight);
                if let Some(pct) = battery {
                    active.session.battery_pct = Some(pct);
                    if pct <= engine.low_battery_pct && !active.low_battery_warned {
                        tracing::warn!(session = %id, battery_pct = pct, "scale battery low");
                        active.low_battery_warned = true;
                    }
                }
                if let Some(err) = active.session.error.as_mut()
                    && err.category == FaultCategory::Scale
                    && !err.recovered
                {
                    err.recovered = true;
                    tracing::info!(session = %id, "scale answering again; kill the brew to clear the error");
                }
                tracing::trace!(session = %id, weight, "sample");
            }
            Err(e) => {
                active.scale_failures = active.scale_failures.saturating_add(1);
                tracing::warn!(
                    session = %id,
                    failures = active.scale_failures,
                    error = %e,
                    "scale read failed"
                );
                if state.is_live() && active.scale_failures >= engine.max_scale_failures {
                    fault = Some(FaultRecord::scale_lost(active.scale_failures, &e, now));
                }
            }
        }

        match write {
            Some(Ok(())) => {
                active.store_write_failures = 0;
                if let Some(err) = active.session.error.as_mut()
                    && err.category == FaultCategory::Timeseries
                    && !err.recovered
                    && active.store_query_failures < engine.max_store_failures
                {
                    err.recovered = true;
                    tracing::info!(session = %id, "time-series store reachable again");
                }
            }
            Some(Err(e)) => {
                active.store_write_failures = active.store_write_failures.saturating_add(1);
                tracing::warn!(
                    session = %id,
                    failures = active.store_write_failures,
                    error = %e,
                    "sample write failed"
                );
                if fault.is_none()
                    && state.is_live()
                    && active.store_write_failures >= engine.max_store_failures
                {
                    fault = Some(FaultRecord::store_failing(active.store_write_failures, &e, now));
                }
            }
            None => {}
        }

        let reached = state.is_live()
            && active
                .session
                .current_weight
                .is_some_and(|w| w >= active.session.target_weight);
        let failures = active.scale_failures;

        if let Some(fault) = fault {
            core.enter_error(fault);
        } else if reached {
            core.complete(now);
            return Tick::Stop;
        }
        Tick::Continue(backoff_delay(
            engine.sample_interval,
            failures,
            engine.backoff_cap,
        ))
    }
}
