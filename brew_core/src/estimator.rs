//! Flow-rate estimation over the store's recent samples.

use std::time::Duration;

use brew_traits::{FlowSample, FlowStore};
use chrono::{DateTime, Utc};

use crate::error::BrewError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimatorMethod {
    /// `(last - first) / elapsed` over the window.
    #[default]
    Endpoints,
    /// Least-squares slope over every sample in the window.
    LinearFit,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FlowEstimator {
    pub method: EstimatorMethod,
}

impl FlowEstimator {
    pub fn new(method: EstimatorMethod) -> Self {
        Self { method }
    }

    /// Flow rate in g/s over `window` ending at `now`, `None` without enough data.
    pub fn estimate<S: FlowStore + ?Sized>(
        &self,
        store: &S,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, BrewError> {
        let rate = match self.method {
            EstimatorMethod::Endpoints => store.query_rate(window, now),
            EstimatorMethod::LinearFit => store.recent(window, now).map(|s| rate(&s)),
        };
        rate.map_err(|e| BrewError::Store(e.to_string()))
    }
}

/// Least-squares slope of weight over time, in g/s.
pub fn rate(samples: &[FlowSample]) -> Option<f64> {
    let pts: Vec<(f64, f64)> = match samples.first() {
        Some(first) => samples
            .iter()
            .filter(|s| s.weight.is_finite())
            .map(|s| {
                let t = (s.timestamp - first.timestamp).num_microseconds()? as f64 / 1e6;
                Some((t, s.weight))
            })
            .collect::<Option<_>>()?,
        None => return None,
    };
    if pts.len() < 2 {
        return None;
    }
    let n = pts.len() as f64;
    let mean_t = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_w = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (t, w) in &pts {
        sxy += (t - mean_t) * (w - mean_w);
        sxx += (t - mean_t) * (t - mean_t);
    }
    if sxx <= 0.0 {
        return None;
    }
    Some(sxy / sxx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + s, 0).unwrap()
    }

    #[test]
    fn slope_of_noisy_line() {
        let samples: Vec<_> = (0..10)
            .map(|i| {
                let jitter = if i % 2 == 0 { 0.1 } else { -0.1 };
                FlowSample::new(at(i * 10), 100.0 + 0.05 * (i * 10) as f64 + jitter)
            })
            .collect();
        let r = rate(&samples).unwrap();
        assert!((r - 0.05).abs() < 0.005, "{r}");
    }

    #[test]
    fn too_few_points() {
        assert_eq!(rate(&[]), None);
        assert_eq!(rate(&[FlowSample::new(at(0), 1.0)]), None);
        assert_eq!(
            rate(&[FlowSample::new(at(0), 1.0), FlowSample::new(at(0), 2.0)]),
            None
        );
    }
}
