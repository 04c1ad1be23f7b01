//! Background periodic loops.
//!
//! Each `PeriodicTask` owns exactly one thread. The thread waits on a
//! zero-capacity shutdown channel between iterations, so `stop()` (or drop)
//! interrupts a wait immediately and then joins. An iteration already running
//! is never interrupted; `stop()` returns once it has finished.

use crossbeam_channel as xch;
use std::thread::JoinHandle;
use std::time::Duration;

/// What a loop body asks for after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Run again after this delay.
    Continue(Duration),
    /// Exit the loop.
    Stop,
}

pub struct PeriodicTask {
    name: String,
    shutdown: Option<xch::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("running", &self.join_handle.is_some())
            .finish()
    }
}

impl PeriodicTask {
    /// Spawn a named thread running `body` first after `first_delay`, then
    /// after whatever delay each call returns.
    pub fn spawn<F>(name: &str, first_delay: Duration, mut body: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        let (tx, rx) = xch::bounded::<()>(0);
        let thread_name = name.to_owned();
        let join_handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let mut wait = first_delay;
                loop {
                    match rx.recv_timeout(wait) {
                        Err(xch::RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => {
                            tracing::debug!(task = %thread_name, "loop received shutdown");
                            break;
                        }
                    }
                    match body() {
                        Tick::Continue(next) => wait = next,
                        Tick::Stop => {
                            tracing::debug!(task = %thread_name, "loop finished");
                            break;
                        }
                    }
                }
                tracing::trace!(task = %thread_name, "loop thread exiting cleanly");
            })?;
        Ok(Self {
            name: name.to_owned(),
            shutdown: Some(tx),
            join_handle: Some(join_handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal shutdown and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the waiting thread.
        self.shutdown.take();
        if let Some(handle) = self.join_handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                // Stopped from inside its own body; the loop exits on its own.
                return;
            }
            match handle.join() {
                Ok(()) => tracing::trace!(task = %self.name, "loop thread joined"),
                Err(e) => tracing::warn!(task = %self.name, ?e, "loop thread panicked"),
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
