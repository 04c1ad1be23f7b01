use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::session::{BrewState, SessionId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrewError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("brew {0} is already in progress")]
    Conflict(SessionId),
    #[error("no brew in progress")]
    NoSession,
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: BrewState },
    #[error("valve command outside the owning brew")]
    NotOwner,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("scale disconnected")]
    Disconnected,
    #[error("timeout waiting for scale")]
    Timeout,
    #[error("time-series store error: {0}")]
    Store(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing scale")]
    MissingScale,
    #[error("missing valve")]
    MissingValve,
    #[error("missing flow store")]
    MissingStore,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    Scale,
    Valve,
    Timeseries,
    Brew,
    Network,
    Hardware,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Structured fault attached to a brew in the Error state.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[error("{message}")]
pub struct FaultRecord {
    pub category: FaultCategory,
    pub severity: Severity,
    pub message: String,
    /// Whether the condition can clear on its own (scale back in range, store
    /// reachable again). A brew in Error still has to be killed.
    pub retryable: bool,
    pub recovery_suggestion: String,
    pub at: DateTime<Utc>,
    /// Set once the failing collaborator works again.
    pub recovered: bool,
}

impl FaultRecord {
    pub fn new(
        category: FaultCategory,
        severity: Severity,
        message: impl Into<String>,
        retryable: bool,
        recovery_suggestion: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            retryable,
            recovery_suggestion: recovery_suggestion.into(),
            at,
            recovered: false,
        }
    }

    /// The scale stopped answering for `failures` reads in a row.
    pub fn scale_lost(failures: u32, last: &BrewError, at: DateTime<Utc>) -> Self {
        Self::new(
            FaultCategory::Scale,
            Severity::Error,
            format!("{failures} consecutive scale reads failed (last: {last})"),
            true,
            "Check that the scale is powered on and in range. Try power cycling the scale, then kill and restart the brew.",
            at,
        )
    }

    pub fn store_failing(failures: u32, last: &BrewError, at: DateTime<Utc>) -> Self {
        Self::new(
            FaultCategory::Timeseries,
            Severity::Error,
            format!("{failures} consecutive time-series operations failed (last: {last})"),
            true,
            "Check that the time-series store is running and reachable, then kill and restart the brew.",
            at,
        )
    }

    /// A valve step failed; the valve position is no longer known.
    pub fn valve_failed(err: &BrewError, at: DateTime<Utc>) -> Self {
        Self::new(
            FaultCategory::Hardware,
            Severity::Critical,
            format!("valve step failed: {err}"),
            false,
            "Check that the valve is not stuck or obstructed and that the motor driver is powered. Kill the brew and re-home the valve before starting again.",
            at,
        )
    }
}

impl From<&BrewError> for FaultCategory {
    fn from(e: &BrewError) -> Self {
        match e {
            BrewError::Config(_) => FaultCategory::Configuration,
            BrewError::Conflict(_) | BrewError::NoSession | BrewError::InvalidState { .. } => {
                FaultCategory::Brew
            }
            BrewError::NotOwner => FaultCategory::Valve,
            BrewError::Hardware(_) => FaultCategory::Hardware,
            BrewError::Disconnected | BrewError::Timeout => FaultCategory::Scale,
            BrewError::Store(_) => FaultCategory::Timeseries,
        }
    }
}
