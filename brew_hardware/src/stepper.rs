//! STEP/DIR stepper driver for the brew valve on Raspberry Pi GPIO.
use std::thread::sleep;
use std::time::Duration;

use brew_traits::{Direction, VALVE_POSITIONS, Valve};
use rppal::gpio::{Gpio, OutputPin};

use crate::error::{HwError, Result};

pub struct GpioValve {
    step: OutputPin,
    dir: OutputPin,
    /// Active-low driver enable, when wired.
    en: Option<OutputPin>,
    position: u8,
    half_period: Duration,
}

impl GpioValve {
    /// `steps_per_sec` bounds the pulse rate; position starts at `initial_position`
    /// since the driver has no encoder.
    pub fn new(
        step_pin: u8,
        dir_pin: u8,
        en_pin: Option<u8>,
        steps_per_sec: u32,
        initial_position: u8,
    ) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut step = gpio
            .get(step_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output();
        let dir = gpio
            .get(dir_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output();
        let en = match en_pin {
            Some(p) => {
                let mut pin = gpio
                    .get(p)
                    .map_err(|e| HwError::Gpio(e.to_string()))?
                    .into_output();
                pin.set_high(); // disabled until the first step
                Some(pin)
            }
            None => None,
        };
        step.set_low();
        let half_period = Duration::from_micros(500_000 / u64::from(steps_per_sec.max(1)));
        Ok(Self {
            step,
            dir,
            en,
            position: (u16::from(initial_position) % VALVE_POSITIONS) as u8,
            half_period,
        })
    }
}

impl Valve for GpioValve {
    fn position(&self) -> u8 {
        self.position
    }

    fn step(
        &mut self,
        direction: Direction,
        count: u32,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(en) = self.en.as_mut() {
            en.set_low();
        }
        match direction {
            Direction::Forward => self.dir.set_high(),
            Direction::Backward => self.dir.set_low(),
        }
        for _ in 0..count {
            self.step.set_high();
            sleep(self.half_period);
            self.step.set_low();
            sleep(self.half_period);
        }
        let delta = (count % u32::from(VALVE_POSITIONS)) as u16;
        let cur = u16::from(self.position);
        self.position = match direction {
            Direction::Forward => ((cur + delta) % VALVE_POSITIONS) as u8,
            Direction::Backward => ((cur + VALVE_POSITIONS - delta) % VALVE_POSITIONS) as u8,
        };
        tracing::debug!(?direction, count, position = self.position, "valve stepped");
        Ok(())
    }

    fn release(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.step.set_low();
        if let Some(en) = self.en.as_mut() {
            en.set_high();
        }
        tracing::info!(position = self.position, "valve driver released");
        Ok(())
    }
}
