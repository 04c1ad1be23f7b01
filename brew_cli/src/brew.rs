//! Brew execution: hardware assembly from config, the run loop and status output.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use brew_config::{Config, SimulationCfg};
use brew_core::{BrewConfig, BrewSession, BrewState, EngineCfg, Scheduling, SessionManager, Tick};
use brew_hardware::{InMemoryFlowStore, ReplayScale, SimParams, SimulatedScale, SimulatedValve};
use brew_traits::{Clock, ManualClock, MonotonicClock};
use eyre::WrapErr;

/// How often the wall-clock runner looks at the brew.
const POLL: Duration = Duration::from_millis(200);

/// The brew was killed from the keyboard.
#[derive(Debug)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("brew interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// The brew was still running when `--max-hours` ran out.
#[derive(Debug)]
pub struct TookTooLong(pub Duration);

impl std::fmt::Display for TookTooLong {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "brew still running after {}", hms(self.0))
    }
}

impl std::error::Error for TookTooLong {}

pub struct BrewOpts<'a> {
    pub trace: Option<&'a Path>,
    pub fast: bool,
    pub status_every: Duration,
    pub max_brew: Duration,
    pub json: bool,
}

pub fn sim_params(s: &SimulationCfg) -> SimParams {
    SimParams {
        max_flow_gps: s.max_flow_gps,
        response_tau_s: s.response_tau_s,
        noise_g: s.noise_g,
        initial_weight_g: s.initial_weight_g,
        battery_pct: s.battery_pct,
        seed: s.seed,
    }
}

fn load_trace(path: &Path) -> eyre::Result<Vec<(f64, f64)>> {
    let rows = brew_config::load_trace_csv(path)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "loaded brew trace");
    Ok(rows.into_iter().map(|r| (r.seconds, r.weight)).collect())
}

/// Wire the simulated (or replayed) brewer into a session manager.
fn assemble<C>(
    cfg: &Config,
    trace: Option<Vec<(f64, f64)>>,
    clock: C,
    scheduling: Scheduling,
) -> eyre::Result<SessionManager>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    let valve = SimulatedValve::new(cfg.simulation.initial_position);
    let valve_handle = valve.handle();
    let builder = SessionManager::builder()
        .with_valve(valve)
        .with_store(InMemoryFlowStore::new(Duration::from_secs(
            cfg.store.retention_s,
        )))
        .with_clock(Arc::new(clock.clone()))
        .with_engine(EngineCfg::from(cfg))
        .with_scheduling(scheduling);
    let mgr = match trace {
        Some(points) => builder.with_scale(ReplayScale::new(clock, points)).build(),
        None => builder
            .with_scale(SimulatedScale::new(
                clock,
                valve_handle,
                sim_params(&cfg.simulation),
            ))
            .build(),
    };
    mgr.wrap_err("assemble brew engine")
}

pub fn run_brew(
    cfg: &Config,
    opts: &BrewOpts<'_>,
    shutdown: &AtomicBool,
) -> eyre::Result<BrewSession> {
    let brew = BrewConfig::try_from(cfg)?;
    let trace = opts.trace.map(load_trace).transpose()?;
    let done = if opts.fast {
        let clock = ManualClock::new();
        let mgr = assemble(cfg, trace, clock.clone(), Scheduling::External)?;
        drive_simulated(&mgr, &clock, brew, opts, shutdown)?
    } else {
        let mgr = assemble(cfg, trace, MonotonicClock::new(), Scheduling::Threads)?;
        watch(&mgr, brew, opts, shutdown)?
    };
    match (&done.state, &done.error) {
        (BrewState::Error, Some(fault)) => Err(eyre::Report::new(fault.clone())),
        _ => Ok(done),
    }
}

fn finished(mgr: &SessionManager) -> Option<BrewSession> {
    mgr.snapshot()
        .filter(|s| matches!(s.state, BrewState::Completed | BrewState::Error))
}

fn interrupt(mgr: &SessionManager) -> eyre::Report {
    mgr.kill();
    tracing::warn!("brew killed from the keyboard");
    eyre::Report::new(Interrupted)
}

fn give_up(mgr: &SessionManager, elapsed: Duration) -> eyre::Report {
    mgr.kill();
    eyre::Report::new(TookTooLong(elapsed))
}

/// Tick the engine on simulated time until the brew finishes.
fn drive_simulated(
    mgr: &SessionManager,
    clock: &ManualClock,
    brew: BrewConfig,
    opts: &BrewOpts<'_>,
    shutdown: &AtomicBool,
) -> eyre::Result<BrewSession> {
    let control_every = brew.valve_interval;
    mgr.start(brew)?;
    let mut next_control = Duration::ZERO;
    let mut next_status = Duration::ZERO;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Err(interrupt(mgr));
        }
        let now = clock.elapsed();
        if now >= next_control {
            mgr.control_tick();
            next_control += control_every;
        }
        let wait = match mgr.sample_tick() {
            Tick::Continue(d) => d,
            Tick::Stop => Duration::ZERO,
        };
        if let Some(done) = finished(mgr) {
            return Ok(done);
        }
        if now >= next_status {
            if let Some(s) = mgr.snapshot() {
                report(&s, now, opts.json);
            }
            next_status += opts.status_every;
        }
        if now >= opts.max_brew {
            return Err(give_up(mgr, now));
        }
        clock.advance(wait.max(Duration::from_millis(1)));
    }
}

/// Let the engine's own loops run the brew and poll it for status.
fn watch(
    mgr: &SessionManager,
    brew: BrewConfig,
    opts: &BrewOpts<'_>,
    shutdown: &AtomicBool,
) -> eyre::Result<BrewSession> {
    mgr.start(brew)?;
    let started = Instant::now();
    let mut next_status = Duration::ZERO;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Err(interrupt(mgr));
        }
        if let Some(done) = finished(mgr) {
            return Ok(done);
        }
        let elapsed = started.elapsed();
        if elapsed >= next_status {
            if let Some(s) = mgr.snapshot() {
                report(&s, elapsed, opts.json);
            }
            next_status += opts.status_every;
        }
        if elapsed >= opts.max_brew {
            return Err(give_up(mgr, elapsed));
        }
        std::thread::sleep(POLL);
    }
}

fn report(s: &BrewSession, elapsed: Duration, json: bool) {
    if json {
        let line = serde_json::json!({
            "event": "status",
            "elapsed_s": elapsed.as_secs_f64(),
            "session": s,
        });
        println!("{line}");
    } else {
        println!("{}", status_line(s, elapsed));
    }
}

pub fn hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h{:02}m{:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
}

pub fn status_line(s: &BrewSession, elapsed: Duration) -> String {
    let weight = s
        .current_weight
        .map_or_else(|| "-".to_owned(), |w| format!("{w:.1} g"));
    let flow = s
        .current_flow_rate
        .map_or_else(|| "-".to_owned(), |f| format!("{f:.4} g/s"));
    let battery = s
        .battery_pct
        .map_or_else(|| "-".to_owned(), |b| format!("{b}%"));
    format!(
        "[{:>10}] {:<9} weight={weight} flow={flow} valve={:>3} battery={battery}",
        hms(elapsed),
        s.state.to_string(),
        s.valve_position
    )
}

/// Start a brew on simulated time, sample, nudge both ways and kill it.
pub fn self_check(cfg: &Config) -> eyre::Result<()> {
    let clock = ManualClock::new();
    let mgr = assemble(cfg, None, clock.clone(), Scheduling::External)?;
    let brew = BrewConfig::try_from(cfg)?;
    let id = mgr.start(brew)?;
    for _ in 0..4 {
        clock.advance(mgr.engine().sample_interval);
        mgr.sample_tick();
    }
    mgr.nudge_open().wrap_err("nudge valve open")?;
    mgr.nudge_close().wrap_err("nudge valve closed")?;
    let snap = mgr
        .snapshot()
        .ok_or_else(|| eyre::eyre!("self-check brew disappeared"))?;
    if snap.state != BrewState::Brewing {
        eyre::bail!("self-check brew ended up {}", snap.state);
    }
    if snap.current_weight.is_none() {
        eyre::bail!("self-check brew never saw a scale reading");
    }
    mgr.kill();
    tracing::info!(session = %id, "self-check passed");
    check_gpio_valve(cfg)
}

/// Wiggle the real valve one step each way when GPIO pins are configured.
#[cfg(feature = "hardware")]
fn check_gpio_valve(cfg: &Config) -> eyre::Result<()> {
    use brew_traits::{Direction, Valve};

    let Some(pins) = &cfg.pins else {
        return Ok(());
    };
    let mut valve = brew_hardware::GpioValve::new(
        pins.valve_step,
        pins.valve_dir,
        pins.valve_en,
        pins.steps_per_sec,
        cfg.simulation.initial_position,
    )
    .wrap_err("open valve GPIO")?;
    let start = valve.position();
    valve
        .step(Direction::Forward, 1)
        .and_then(|_| valve.step(Direction::Backward, 1))
        .map_err(|e| eyre::eyre!("valve step failed: {e}"))?;
    valve
        .release()
        .map_err(|e| eyre::eyre!("valve release failed: {e}"))?;
    if valve.position() != start {
        eyre::bail!("valve ended at {} instead of {start}", valve.position());
    }
    tracing::info!(position = start, "valve GPIO ok");
    Ok(())
}

#[cfg(not(feature = "hardware"))]
fn check_gpio_valve(cfg: &Config) -> eyre::Result<()> {
    if cfg.pins.is_some() {
        tracing::warn!("[pins] configured but this build has no GPIO support; skipping valve check");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_formats_hours_minutes_seconds() {
        assert_eq!(hms(Duration::from_secs(0)), "0h00m00s");
        assert_eq!(hms(Duration::from_secs(3 * 3600 + 7 * 60 + 9)), "3h07m09s");
    }

    #[test]
    fn self_check_passes_on_defaults() {
        self_check(&Config::default()).unwrap();
    }

    #[test]
    fn fast_brew_completes_on_the_simulator() {
        let mut cfg = Config::default();
        cfg.brew.target_weight_g = 260.0;
        let opts = BrewOpts {
            trace: None,
            fast: true,
            status_every: Duration::from_secs(3600),
            max_brew: Duration::from_secs(12 * 3600),
            json: false,
        };
        let done = run_brew(&cfg, &opts, &AtomicBool::new(false)).unwrap();
        assert_eq!(done.state, BrewState::Completed);
        assert!(done.current_weight.unwrap() >= 260.0);
        assert!(done.valve_steps > 0);
    }

    #[test]
    fn interrupted_fast_brew_reports_interrupted() {
        let opts = BrewOpts {
            trace: None,
            fast: true,
            status_every: Duration::from_secs(3600),
            max_brew: Duration::from_secs(3600),
            json: false,
        };
        let err = run_brew(&Config::default(), &opts, &AtomicBool::new(true)).unwrap_err();
        assert!(err.downcast_ref::<Interrupted>().is_some());
    }
}
