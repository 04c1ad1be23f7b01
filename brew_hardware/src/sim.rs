//! Simulated scale and valve.
//!
//! The valve and scale share a `ValveHandle`: the scale derives the liquid
//! flow from how far the valve is open, lags it through a first-order response
//! and integrates it into weight using the injected clock. Faults (scale
//! disconnect, valve stall) can be injected through the handles.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use brew_traits::{Clock, Direction, Scale, VALVE_POSITIONS, Valve};

use crate::error::HwError;

/// Shared view of a simulated valve.
#[derive(Debug, Clone, Default)]
pub struct ValveHandle {
    position: Arc<AtomicU8>,
    steps: Arc<AtomicU64>,
    stall: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl ValveHandle {
    pub fn position(&self) -> u8 {
        self.position.load(Ordering::Relaxed)
    }

    /// Total individual steps issued since construction.
    pub fn steps_taken(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Make every subsequent `step` fail until cleared.
    pub fn set_stalled(&self, stalled: bool) {
        self.stall.store(stalled, Ordering::Relaxed);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    /// Fraction of full opening in [0, 1].
    pub fn opening(&self) -> f64 {
        f64::from(self.position()) / f64::from(VALVE_POSITIONS - 1)
    }
}

/// Stepper valve that only tracks its position.
#[derive(Debug, Default)]
pub struct SimulatedValve {
    handle: ValveHandle,
}

impl SimulatedValve {
    pub fn new(initial_position: u8) -> Self {
        let handle = ValveHandle::default();
        let pos = (u16::from(initial_position) % VALVE_POSITIONS) as u8;
        handle.position.store(pos, Ordering::Relaxed);
        Self { handle }
    }

    pub fn handle(&self) -> ValveHandle {
        self.handle.clone()
    }
}

impl Valve for SimulatedValve {
    fn position(&self) -> u8 {
        self.handle.position()
    }

    fn step(
        &mut self,
        direction: Direction,
        count: u32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.handle.stall.load(Ordering::Relaxed) {
            return Err(Box::new(HwError::Stalled));
        }
        let delta = (count % u32::from(VALVE_POSITIONS)) as u16;
        let cur = u16::from(self.handle.position());
        let next = match direction {
            Direction::Forward => (cur + delta) % VALVE_POSITIONS,
            Direction::Backward => (cur + VALVE_POSITIONS - delta) % VALVE_POSITIONS,
        };
        self.handle.position.store(next as u8, Ordering::Relaxed);
        self.handle
            .steps
            .fetch_add(u64::from(count), Ordering::Relaxed);
        self.handle.released.store(false, Ordering::Relaxed);
        tracing::trace!(?direction, count, position = next, "sim valve step");
        Ok(())
    }

    fn release(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.handle.released.store(true, Ordering::Relaxed);
        tracing::debug!(position = self.handle.position(), "sim valve released");
        Ok(())
    }
}

/// Physical parameters of the simulated brewer.
#[derive(Debug, Clone)]
pub struct SimParams {
    /// Flow through a fully open valve (g/s).
    pub max_flow_gps: f64,
    /// Time constant of the flow response to a valve change (s).
    pub response_tau_s: f64,
    /// Peak amplitude of uniform reading noise (g).
    pub noise_g: f64,
    /// Weight on the scale when the simulation starts (g).
    pub initial_weight_g: f64,
    pub battery_pct: u8,
    /// PRNG seed for reading noise.
    pub seed: u32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            max_flow_gps: 0.2,
            response_tau_s: 15.0,
            noise_g: 0.0,
            initial_weight_g: 0.0,
            battery_pct: 100,
            seed: 0xC0FFEE,
        }
    }
}

/// Control knobs for a running `SimulatedScale`.
#[derive(Debug, Clone, Default)]
pub struct ScaleHandle {
    disconnected: Arc<AtomicBool>,
}

impl ScaleHandle {
    /// Simulate the wireless link dropping (or coming back).
    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::Relaxed);
    }
}

/// Scale whose weight grows with the flow let through by a `SimulatedValve`.
pub struct SimulatedScale<C: Clock> {
    clock: C,
    valve: ValveHandle,
    params: SimParams,
    handle: ScaleHandle,
    weight: f64,
    flow: f64,
    last: Option<Instant>,
    rng: u32,
}

impl<C: Clock> SimulatedScale<C> {
    pub fn new(clock: C, valve: ValveHandle, params: SimParams) -> Self {
        Self {
            clock,
            valve,
            weight: params.initial_weight_g,
            flow: 0.0,
            last: None,
            rng: params.seed.max(1),
            handle: ScaleHandle::default(),
            params,
        }
    }

    pub fn handle(&self) -> ScaleHandle {
        self.handle.clone()
    }

    /// Noise-free weight accumulated so far.
    pub fn true_weight(&self) -> f64 {
        self.weight
    }

    fn advance(&mut self) {
        let now = self.clock.now();
        let dt = self
            .last
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        self.last = Some(now);
        if dt <= 0.0 {
            return;
        }
        let target_flow = self.params.max_flow_gps * self.valve.opening();
        let alpha = if self.params.response_tau_s > 0.0 {
            (-dt / self.params.response_tau_s).exp()
        } else {
            0.0
        };
        let prev = self.flow;
        self.flow = target_flow + (prev - target_flow) * alpha;
        // trapezoid over the step keeps the integral close for long ticks
        self.weight += 0.5 * (prev + self.flow) * dt;
    }

    fn noise(&mut self) -> f64 {
        if self.params.noise_g <= 0.0 {
            return 0.0;
        }
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let unit = f64::from(x) / (f64::from(u32::MAX) + 1.0);
        (unit * 2.0 - 1.0) * self.params.noise_g
    }
}

impl<C: Clock> Scale for SimulatedScale<C> {
    fn connected(&self) -> bool {
        !self.handle.disconnected.load(Ordering::Relaxed)
    }

    fn read_weight(&mut self) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        // liquid keeps flowing whether or not the scale can report it
        self.advance();
        if !self.connected() {
            return Err(Box::new(HwError::Disconnected));
        }
        let w = self.weight + self.noise();
        tracing::trace!(weight = w, flow = self.flow, "sim scale read");
        Ok(w)
    }

    fn battery_pct(&mut self) -> Option<u8> {
        Some(self.params.battery_pct)
    }
}
