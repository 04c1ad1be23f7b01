//! Scale that plays back a recorded brew trace.
use std::time::Instant;

use brew_traits::{Clock, Scale};

use crate::error::HwError;

/// Replays `(seconds, weight)` points against the injected clock.
///
/// Time starts at the first read. Each read returns the weight of the latest
/// point at or before the elapsed time; once the elapsed time passes the last
/// point the trace is exhausted and reads fail.
pub struct ReplayScale<C: Clock> {
    clock: C,
    points: Vec<(f64, f64)>,
    started: Option<Instant>,
    cursor: usize,
}

impl<C: Clock> ReplayScale<C> {
    /// `points` must be sorted by time; the loader in `brew_config` enforces this.
    pub fn new(clock: C, points: Vec<(f64, f64)>) -> Self {
        Self {
            clock,
            points,
            started: None,
            cursor: 0,
        }
    }

    fn duration_s(&self) -> f64 {
        self.points.last().map_or(0.0, |p| p.0)
    }
}

impl<C: Clock> Scale for ReplayScale<C> {
    fn connected(&self) -> bool {
        !self.points.is_empty()
    }

    fn read_weight(&mut self) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        if self.points.is_empty() {
            return Err(Box::new(HwError::Disconnected));
        }
        let now = self.clock.now();
        let start = *self.started.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        if elapsed > self.duration_s() {
            return Err(Box::new(HwError::TraceExhausted));
        }
        while self.cursor + 1 < self.points.len() && self.points[self.cursor + 1].0 <= elapsed {
            self.cursor += 1;
        }
        Ok(self.points[self.cursor].1)
    }
}
