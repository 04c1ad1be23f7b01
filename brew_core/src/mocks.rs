//! Test and helper mocks for brew_core.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brew_traits::{FlowSample, FlowStore, Scale};
use chrono::{DateTime, Utc};

use crate::util::lock;

#[derive(Debug, Clone)]
enum Scripted {
    Weight(f64),
    Fail(String),
}

#[derive(Debug, Default)]
struct ScaleScript {
    queue: VecDeque<Scripted>,
    last: Option<f64>,
    battery: Option<u8>,
}

/// Handle for feeding a `ScriptedScale` from a test.
#[derive(Debug, Clone, Default)]
pub struct ScaleScriptHandle {
    inner: Arc<Mutex<ScaleScript>>,
    disconnected: Arc<AtomicBool>,
}

impl ScaleScriptHandle {
    pub fn push_weight(&self, w: f64) {
        lock(&self.inner).queue.push_back(Scripted::Weight(w));
    }

    pub fn push_weights(&self, ws: impl IntoIterator<Item = f64>) {
        let mut s = lock(&self.inner);
        s.queue.extend(ws.into_iter().map(Scripted::Weight));
    }

    pub fn push_failure(&self, msg: &str) {
        lock(&self.inner)
            .queue
            .push_back(Scripted::Fail(msg.to_owned()));
    }

    pub fn set_battery(&self, pct: Option<u8>) {
        lock(&self.inner).battery = pct;
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::Relaxed);
    }
}

/// Scale that replays queued readings and failures, then repeats the last weight.
#[derive(Debug, Default)]
pub struct ScriptedScale {
    handle: ScaleScriptHandle,
}

impl ScriptedScale {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ScaleScriptHandle {
        self.handle.clone()
    }
}

impl Scale for ScriptedScale {
    fn connected(&self) -> bool {
        !self.handle.disconnected.load(Ordering::Relaxed)
    }

    fn read_weight(&mut self) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        let mut s = lock(&self.handle.inner);
        match s.queue.pop_front() {
            Some(Scripted::Weight(w)) => {
                s.last = Some(w);
                Ok(w)
            }
            Some(Scripted::Fail(msg)) => Err(Box::new(std::io::Error::other(msg))),
            None => match s.last {
                Some(w) => Ok(w),
                None => Err(Box::new(std::io::Error::other("no scripted reading"))),
            },
        }
    }

    fn battery_pct(&mut self) -> Option<u8> {
        lock(&self.handle.inner).battery
    }
}

/// Store wrapper whose writes and queries can be made to fail.
#[derive(Debug, Clone)]
pub struct FlakyStore<S> {
    inner: Arc<Mutex<S>>,
    failing: Arc<AtomicBool>,
    queries_failing: Arc<AtomicBool>,
}

impl<S: FlowStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
            failing: Arc::new(AtomicBool::new(false)),
            queries_failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Fail only `recent`; writes keep succeeding.
    pub fn set_queries_failing(&self, failing: bool) {
        self.queries_failing.store(failing, Ordering::Relaxed);
    }

    fn check(&self, query: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.failing.load(Ordering::Relaxed)
            || (query && self.queries_failing.load(Ordering::Relaxed))
        {
            Err(Box::new(std::io::Error::other("store unreachable")))
        } else {
            Ok(())
        }
    }
}

impl<S: FlowStore> FlowStore for FlakyStore<S> {
    fn write(&mut self, sample: FlowSample) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.check(false)?;
        lock(&self.inner).write(sample)
    }

    fn recent(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<FlowSample>, Box<dyn std::error::Error + Send + Sync>> {
        self.check(true)?;
        lock(&self.inner).recent(window, now)
    }
}
