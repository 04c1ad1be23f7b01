//! Maps `Box<dyn Error>` from trait boundaries to typed `BrewError`.
//!
//! The ports in `brew_traits` use `Box<dyn Error + Send + Sync>` so any driver
//! can plug in; this module converts those to our typed error enum, with an
//! optional feature-gated path for `brew_hardware::HwError` downcasting.

use crate::error::BrewError;

/// Map a trait-boundary error to a typed `BrewError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> BrewError {
    #[cfg(feature = "hardware-errors")]
    {
        use brew_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => BrewError::Timeout,
                HwError::Disconnected | HwError::TraceExhausted => BrewError::Disconnected,
                other => BrewError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        BrewError::Timeout
    } else if lower.contains("disconnect") {
        BrewError::Disconnected
    } else {
        BrewError::Hardware(s)
    }
}
