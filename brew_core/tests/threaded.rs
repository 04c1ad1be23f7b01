//! The engine on its own loop threads, with real time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use brew_core::mocks::ScriptedScale;
use brew_core::{BrewConfig, BrewState, EngineCfg, SessionManager};
use brew_hardware::{InMemoryFlowStore, SimulatedValve};
use brew_traits::{FlowSample, FlowStore};
use chrono::{DateTime, Utc};
use crossbeam_channel as xch;

/// Store whose next window query parks until the test lets it go.
struct GatedStore {
    inner: InMemoryFlowStore,
    armed: Arc<AtomicBool>,
    entered: xch::Sender<()>,
    release: xch::Receiver<()>,
}

impl FlowStore for GatedStore {
    fn write(&mut self, sample: FlowSample) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.inner.write(sample)
    }

    fn recent(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<FlowSample>, Box<dyn std::error::Error + Send + Sync>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.try_send(());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
        self.inner.recent(window, now)
    }
}

fn fast_engine() -> EngineCfg {
    EngineCfg {
        sample_interval: Duration::from_millis(10),
        ..EngineCfg::default()
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn kill_discards_a_control_decision_in_flight() {
    // Half a minute of slow flow: left alone, the control tick would open the valve.
    let mut inner = InMemoryFlowStore::default();
    let now = Utc::now();
    for i in 0..=30 {
        let at = now - chrono::Duration::seconds(30 - i);
        inner
            .write(FlowSample::new(at, 500.0 + 0.01 * i as f64))
            .unwrap();
    }
    let (entered_tx, entered_rx) = xch::bounded(1);
    let (release_tx, release_rx) = xch::bounded(1);
    let store = GatedStore {
        inner,
        armed: Arc::new(AtomicBool::new(true)),
        entered: entered_tx,
        release: release_rx,
    };

    let scale = ScriptedScale::new();
    scale.handle().push_weight(500.3);
    let valve = SimulatedValve::new(0);
    let valve_handle = valve.handle();
    let mgr = SessionManager::builder()
        .with_scale(scale)
        .with_valve(valve)
        .with_store(store)
        .with_engine(fast_engine())
        .build()
        .unwrap();

    mgr.start(BrewConfig::default()).unwrap();
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("control tick reached the store");

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();
    });
    mgr.kill();
    releaser.join().unwrap();

    assert_eq!(mgr.state(), BrewState::Idle);
    assert_eq!(valve_handle.steps_taken(), 0);
    assert!(valve_handle.is_released());
}

#[test]
fn loops_complete_a_brew_on_their_own() {
    let scale = ScriptedScale::new();
    let script = scale.handle();
    script.push_weights([1000.0, 1200.0, 1400.0]);
    let valve = SimulatedValve::new(0);
    let valve_handle = valve.handle();
    let mgr = SessionManager::builder()
        .with_scale(scale)
        .with_valve(valve)
        .with_store(InMemoryFlowStore::default())
        .with_engine(fast_engine())
        .build()
        .unwrap();

    mgr.start(BrewConfig::default()).unwrap();
    assert!(wait_for(|| mgr.state() == BrewState::Completed));
    let snap = mgr.snapshot().unwrap();
    assert_eq!(snap.current_weight, Some(1400.0));
    assert!(valve_handle.is_released());

    // The finished loops are reaped by the next start, which completes at once
    // because the scale keeps reporting 1400 g.
    let first = snap.id;
    let second = mgr.start(BrewConfig::default()).unwrap();
    assert_ne!(first, second);
    assert!(wait_for(|| mgr.state() == BrewState::Completed));
    assert_eq!(mgr.snapshot().unwrap().id, second);
}
