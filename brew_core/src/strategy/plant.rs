use super::positive;
use crate::error::BrewError;

/// First-order model of how valve actuation turns into flow:
/// `y' = alpha * y + (1 - alpha) * gain * u`, `alpha = exp(-dt / tau)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstOrderPlant {
    pub gain: f64,
    pub time_constant: f64,
}

impl Default for FirstOrderPlant {
    fn default() -> Self {
        Self {
            gain: 0.005,
            time_constant: 15.0,
        }
    }
}

impl FirstOrderPlant {
    pub fn alpha(&self, dt_s: f64) -> f64 {
        (-dt_s / self.time_constant).exp()
    }

    #[inline]
    pub fn advance(&self, alpha: f64, y: f64, u: f64) -> f64 {
        alpha * y + (1.0 - alpha) * self.gain * u
    }

    pub(crate) fn validate(&self) -> Result<(), BrewError> {
        positive("plant_gain", self.gain)?;
        positive("plant_time_constant", self.time_constant)
    }
}
