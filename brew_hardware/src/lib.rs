//! Scale, valve and store backends for the brew engine.
//!
//! Everything here implements the ports in `brew_traits`. The simulator and
//! in-memory store are always available; the GPIO stepper needs the
//! `hardware` feature.
pub mod error;
pub mod replay;
pub mod sim;
pub mod store;

#[cfg(feature = "hardware")]
pub mod stepper;

pub use replay::ReplayScale;
pub use sim::{ScaleHandle, SimParams, SimulatedScale, SimulatedValve, ValveHandle};
pub use store::InMemoryFlowStore;

#[cfg(feature = "hardware")]
pub use stepper::GpioValve;
