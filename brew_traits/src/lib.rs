//! Port traits shared by the brew engine and its hardware backends.
//!
//! The engine in `brew_core` never talks to a driver directly: the scale, the
//! valve and the time-series store all sit behind the traits below so the
//! simulator, trace replay and real GPIO backends are interchangeable.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Number of valve positions in one full stepper rotation.
pub const VALVE_POSITIONS: u16 = 200;

/// Direction of a valve step. Forward opens, Backward closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

/// One weight reading. Append-only; never mutated once written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSample {
    pub timestamp: DateTime<Utc>,
    pub weight: f64,
}

impl FlowSample {
    pub fn new(timestamp: DateTime<Utc>, weight: f64) -> Self {
        Self { timestamp, weight }
    }
}

pub trait Scale {
    fn connected(&self) -> bool;
    fn read_weight(&mut self) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;
    /// Remaining battery in percent, when the scale reports it.
    fn battery_pct(&mut self) -> Option<u8> {
        None
    }
}

pub trait Valve {
    /// Current position in `0..VALVE_POSITIONS`.
    fn position(&self) -> u8;
    fn step(
        &mut self,
        direction: Direction,
        count: u32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// De-energise the driver. Called when a session gives up the valve.
    fn release(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Write/query contract of the external time-series engine.
pub trait FlowStore {
    fn write(&mut self, sample: FlowSample) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Samples with `now - window <= timestamp <= now`, oldest first.
    fn recent(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<FlowSample>, Box<dyn std::error::Error + Send + Sync>>;

    /// Rate of change between the first and last usable samples of the window (g/s).
    ///
    /// `Ok(None)` means there is no estimate: fewer than two finite samples or a
    /// non-positive time span.
    fn query_rate(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>> {
        let samples = self.recent(window, now)?;
        let mut usable = samples.iter().filter(|s| s.weight.is_finite());
        let (Some(first), Some(last)) = (usable.next(), usable.next_back()) else {
            return Ok(None);
        };
        let dt = (last.timestamp - first.timestamp).num_microseconds();
        match dt {
            Some(us) if us > 0 => Ok(Some((last.weight - first.weight) / (us as f64 / 1e6))),
            _ => Ok(None),
        }
    }
}

impl<T: Scale + ?Sized> Scale for Box<T> {
    fn connected(&self) -> bool {
        (**self).connected()
    }
    fn read_weight(&mut self) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_weight()
    }
    fn battery_pct(&mut self) -> Option<u8> {
        (**self).battery_pct()
    }
}

impl<T: Valve + ?Sized> Valve for Box<T> {
    fn position(&self) -> u8 {
        (**self).position()
    }
    fn step(
        &mut self,
        direction: Direction,
        count: u32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).step(direction, count)
    }
    fn release(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).release()
    }
}

impl<T: FlowStore + ?Sized> FlowStore for Box<T> {
    fn write(&mut self, sample: FlowSample) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).write(sample)
    }
    fn recent(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<FlowSample>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).recent(window, now)
    }
    fn query_rate(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).query_rate(window, now)
    }
}
