//! Brew lifecycle driven tick by tick on a manual clock.

use std::sync::Arc;
use std::time::Duration;

use brew_core::mocks::{ScaleScriptHandle, ScriptedScale};
use brew_core::{BrewConfig, BrewError, BrewState, Scheduling, SessionManager, Tick};
use brew_hardware::{InMemoryFlowStore, SimulatedValve, ValveHandle};
use brew_traits::ManualClock;

struct Rig {
    mgr: SessionManager,
    scale: ScaleScriptHandle,
    valve: ValveHandle,
    clock: ManualClock,
}

fn rig(initial_position: u8) -> Rig {
    let clock = ManualClock::new();
    let scale = ScriptedScale::new();
    let scale_handle = scale.handle();
    let valve = SimulatedValve::new(initial_position);
    let valve_handle = valve.handle();
    let mgr = SessionManager::builder()
        .with_scale(scale)
        .with_valve(valve)
        .with_store(InMemoryFlowStore::default())
        .with_clock(Arc::new(clock.clone()))
        .with_scheduling(Scheduling::External)
        .build()
        .unwrap();
    Rig {
        mgr,
        scale: scale_handle,
        valve: valve_handle,
        clock,
    }
}

fn brew_error(r: brew_core::Result<impl std::fmt::Debug>) -> BrewError {
    r.unwrap_err()
        .downcast_ref::<BrewError>()
        .cloned()
        .expect("BrewError")
}

/// Advance half a second and take one sample.
fn sample(r: &Rig) -> Tick {
    r.clock.advance(Duration::from_millis(500));
    r.mgr.sample_tick()
}

#[test]
fn completes_at_target_and_never_steps_afterwards() {
    let r = rig(0);
    // 0.02 g per 500 ms sample: 0.04 g/s, below the 0.05 target band.
    let weights: Vec<f64> = (0..400).map(|i| 1330.0 + 0.02 * f64::from(i)).collect();
    let crossing = *weights.iter().find(|&&w| w >= 1337.0).unwrap();
    r.scale.push_weights(weights);

    let cfg = BrewConfig {
        return_to_start_on_kill: false,
        ..BrewConfig::default()
    };
    assert_eq!(cfg.target_weight, 1337.0);
    let id = r.mgr.start(cfg).unwrap();

    let mut ticks = 0;
    while r.mgr.state() == BrewState::Brewing && ticks < 1000 {
        if ticks % 120 == 0 {
            assert_eq!(r.mgr.control_tick(), Tick::Continue(Duration::from_secs(60)));
        }
        sample(&r);
        ticks += 1;
    }

    let snap = r.mgr.snapshot().unwrap();
    assert_eq!(snap.id, id);
    assert_eq!(snap.state, BrewState::Completed);
    assert_eq!(snap.current_weight, Some(crossing));
    let done = snap.time_completed.unwrap();
    assert!(done >= snap.time_started);
    assert!(snap.valve_steps > 0);
    assert!(r.valve.is_released());

    let steps_at_completion = r.valve.steps_taken();
    for _ in 0..5 {
        assert_eq!(r.mgr.control_tick(), Tick::Stop);
        assert_eq!(sample(&r), Tick::Stop);
    }
    assert_eq!(r.valve.steps_taken(), steps_at_completion);
    assert_eq!(r.mgr.snapshot().unwrap().time_completed, Some(done));

    // A completed brew gives the valve back; the next brew can start.
    r.mgr.start(BrewConfig::default()).unwrap();
}

#[test]
fn pause_and_resume_are_idempotent_and_change_nothing_else() {
    let r = rig(0);
    r.scale.push_weight(200.0);
    r.mgr.start(BrewConfig::default()).unwrap();
    sample(&r);
    let before = r.mgr.snapshot().unwrap();

    r.mgr.pause().unwrap();
    r.mgr.pause().unwrap();
    assert_eq!(r.mgr.state(), BrewState::Paused);
    r.mgr.resume().unwrap();
    r.mgr.resume().unwrap();

    assert_eq!(r.mgr.snapshot().unwrap(), before);
}

#[test]
fn paused_control_ticks_leave_the_valve_alone() {
    let r = rig(0);
    r.scale
        .push_weights((0..400).map(|i| 100.0 + 0.005 * f64::from(i)));
    r.mgr.start(BrewConfig::default()).unwrap();
    for _ in 0..120 {
        sample(&r);
    }
    r.mgr.pause().unwrap();
    for _ in 0..3 {
        assert!(matches!(r.mgr.control_tick(), Tick::Continue(_)));
    }
    assert_eq!(r.valve.steps_taken(), 0);
    assert!(r.mgr.snapshot().unwrap().current_flow_rate.is_some());

    r.mgr.resume().unwrap();
    r.mgr.control_tick();
    assert_eq!(r.valve.steps_taken(), 1);
    assert_eq!(r.mgr.snapshot().unwrap().valve_position, 1);
}

#[test]
fn second_start_conflicts_with_the_live_brew() {
    let r = rig(0);
    let id = r.mgr.start(BrewConfig::default()).unwrap();
    assert_eq!(
        brew_error(r.mgr.start(BrewConfig::default())),
        BrewError::Conflict(id)
    );
    r.mgr.pause().unwrap();
    assert_eq!(
        brew_error(r.mgr.start(BrewConfig::default())),
        BrewError::Conflict(id)
    );
}

#[test]
fn invalid_config_is_rejected_before_anything_starts() {
    let r = rig(0);
    let cfg = BrewConfig {
        target_flow_rate: 0.5,
        ..BrewConfig::default()
    };
    assert!(matches!(
        brew_error(r.mgr.start(cfg)),
        BrewError::Config(m) if m.contains("target_flow_rate")
    ));
    assert_eq!(r.mgr.state(), BrewState::Idle);
    assert!(r.mgr.snapshot().is_none());
}

#[test]
fn nudges_only_while_brewing() {
    let r = rig(199);
    assert_eq!(brew_error(r.mgr.nudge_open()), BrewError::NoSession);

    r.mgr.start(BrewConfig::default()).unwrap();
    r.mgr.nudge_open().unwrap();
    assert_eq!(r.valve.position(), 0);
    assert_eq!(r.mgr.snapshot().unwrap().valve_position, 0);
    r.mgr.nudge_close().unwrap();
    assert_eq!(r.mgr.snapshot().unwrap().valve_position, 199);

    r.mgr.pause().unwrap();
    assert_eq!(
        brew_error(r.mgr.nudge_open()),
        BrewError::InvalidState {
            op: "nudge",
            state: BrewState::Paused
        }
    );
    assert_eq!(r.valve.steps_taken(), 2);
}

#[test]
fn kill_returns_the_valve_and_goes_idle() {
    let r = rig(10);
    r.mgr.start(BrewConfig::default()).unwrap();
    for _ in 0..3 {
        r.mgr.nudge_open().unwrap();
    }
    assert_eq!(r.valve.position(), 13);

    r.mgr.kill();
    assert_eq!(r.valve.position(), 10);
    assert!(r.valve.is_released());
    assert_eq!(r.mgr.state(), BrewState::Idle);
    assert!(r.mgr.snapshot().is_none());
    assert_eq!(r.mgr.sample_tick(), Tick::Stop);
    assert_eq!(r.mgr.control_tick(), Tick::Stop);

    // Idempotent.
    r.mgr.kill();
    assert_eq!(r.mgr.state(), BrewState::Idle);
}

#[test]
fn kill_without_return_leaves_the_valve_where_it_is() {
    let r = rig(10);
    r.mgr
        .start(BrewConfig {
            return_to_start_on_kill: false,
            ..BrewConfig::default()
        })
        .unwrap();
    r.mgr.nudge_close().unwrap();
    r.mgr.kill();
    assert_eq!(r.valve.position(), 9);
    assert!(r.valve.is_released());
}

#[test]
fn snapshot_serializes_for_polling() {
    let r = rig(0);
    r.scale.push_weight(321.5);
    r.scale.set_battery(Some(80));
    let id = r.mgr.start(BrewConfig::default()).unwrap();
    sample(&r);

    let v = serde_json::to_value(r.mgr.snapshot().unwrap()).unwrap();
    assert_eq!(v["id"], id.to_string());
    assert_eq!(v["state"], "brewing");
    assert_eq!(v["strategy"], "default");
    assert_eq!(v["current_weight"], 321.5);
    assert_eq!(v["battery_pct"], 80);
    assert!(v["current_flow_rate"].is_null());
    assert!(v["error"].is_null());
}
