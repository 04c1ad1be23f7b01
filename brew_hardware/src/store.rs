//! In-process stand-in for the time-series engine.
use std::collections::VecDeque;
use std::time::Duration;

use brew_traits::{FlowSample, FlowStore};
use chrono::{DateTime, Utc};

/// Append-only sample buffer that forgets samples older than `retention`
/// (measured against the newest sample).
#[derive(Debug, Clone)]
pub struct InMemoryFlowStore {
    samples: VecDeque<FlowSample>,
    retention: Duration,
}

impl Default for InMemoryFlowStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2 * 60 * 60))
    }
}

impl InMemoryFlowStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn prune(&mut self, newest: DateTime<Utc>) {
        let Ok(keep) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let Some(cutoff) = newest.checked_sub_signed(keep) else {
            return;
        };
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }
}

impl FlowStore for InMemoryFlowStore {
    fn write(&mut self, sample: FlowSample) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // keep the buffer time-ordered even if a caller hands us a stale stamp
        let pos = self
            .samples
            .iter()
            .rposition(|s| s.timestamp <= sample.timestamp)
            .map_or(0, |i| i + 1);
        self.samples.insert(pos, sample);
        if let Some(newest) = self.samples.back().map(|s| s.timestamp) {
            self.prune(newest);
        }
        Ok(())
    }

    fn recent(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<FlowSample>, Box<dyn std::error::Error + Send + Sync>> {
        let span = chrono::Duration::from_std(window)?;
        let from = now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self
            .samples
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= now)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap_or_default()
    }

    #[rstest]
    #[case(60, 3)]
    #[case(30, 2)]
    #[case(5, 1)]
    fn recent_respects_window(#[case] window_s: u64, #[case] expected: usize) {
        let mut store = InMemoryFlowStore::default();
        for (s, w) in [(0, 1.0), (30, 2.0), (60, 3.0)] {
            store.write(FlowSample::new(t(s), w)).unwrap();
        }
        let got = store.recent(Duration::from_secs(window_s), t(60)).unwrap();
        assert_eq!(got.len(), expected);
        assert_eq!(got.last().map(|s| s.weight), Some(3.0));
    }

    #[test]
    fn retention_drops_old_samples() {
        let mut store = InMemoryFlowStore::new(Duration::from_secs(100));
        for s in 0..10 {
            store.write(FlowSample::new(t(s * 50), s as f64)).unwrap();
        }
        // newest at 450 s, cutoff 350 s
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn out_of_order_write_is_sorted() {
        let mut store = InMemoryFlowStore::default();
        store.write(FlowSample::new(t(10), 2.0)).unwrap();
        store.write(FlowSample::new(t(0), 1.0)).unwrap();
        let got = store.recent(Duration::from_secs(60), t(10)).unwrap();
        assert_eq!(got[0].weight, 1.0);
        assert_eq!(got[1].weight, 2.0);
    }

    #[test]
    fn rate_uses_window_endpoints() {
        let mut store = InMemoryFlowStore::default();
        store.write(FlowSample::new(t(0), 100.0)).unwrap();
        store.write(FlowSample::new(t(20), 100.5)).unwrap();
        store.write(FlowSample::new(t(40), 102.0)).unwrap();
        let rate = store
            .query_rate(Duration::from_secs(40), t(40))
            .unwrap()
            .unwrap();
        assert!((rate - 0.05).abs() < 1e-12);
    }
}
