use std::time::Duration;

use brew_hardware::{InMemoryFlowStore, SimParams, SimulatedScale, SimulatedValve};
use brew_traits::{Clock, Direction, FlowSample, FlowStore, ManualClock, Scale, Valve};
use rstest::rstest;

// Settle the plant at a fixed opening and check the stored rate matches the
// steady-state flow for that opening.
#[rstest]
#[case(50)]
#[case(100)]
#[case(199)]
fn stored_rate_tracks_valve_opening(#[case] position: u32) {
    let clock = ManualClock::new();
    let mut valve = SimulatedValve::new(0);
    valve.step(Direction::Forward, position).unwrap();
    let mut scale = SimulatedScale::new(clock.clone(), valve.handle(), SimParams::default());
    let mut store = InMemoryFlowStore::default();

    for _ in 0..1200 {
        let w = scale.read_weight().unwrap();
        store.write(FlowSample::new(clock.utc_now(), w)).unwrap();
        clock.sleep(Duration::from_millis(500));
    }

    let rate = store
        .query_rate(Duration::from_secs(60), clock.utc_now())
        .unwrap()
        .unwrap();
    let expected = 0.2 * f64::from(position) / 199.0;
    assert!((rate - expected).abs() < 1e-3, "rate {rate} expected {expected}");
}
