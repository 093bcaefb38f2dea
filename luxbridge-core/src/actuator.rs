//! Threshold-driven output pin
//!
//! An [`Actuator`] owns one output pin and a [`Latch`]. Each value fed to
//! [`Actuator::update`] moves the latch; only a transition touches the pin.
//! If the write fails the latch is rolled back, so the next value that still
//! sits past the threshold attempts the transition again.

use alloc::sync::Arc;

use crate::errors::GpioFault;
use crate::gpio::{Direction, GpioPort, Level};
use crate::threshold::{ActuatorThreshold, Edge, Latch};

/// Output pin switched by a hysteresis latch
pub struct Actuator {
    port: Arc<dyn GpioPort>,
    pin: u8,
    active_low: bool,
    latch: Latch,
}

impl core::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Actuator")
            .field("pin", &self.pin)
            .field("active_low", &self.active_low)
            .field("latch", &self.latch)
            .finish_non_exhaustive()
    }
}

impl Actuator {
    /// Configure the pin as output and drive it inactive
    pub fn new(port: Arc<dyn GpioPort>, threshold: ActuatorThreshold) -> Result<Self, GpioFault> {
        let pin = threshold.pin();
        port.configure(pin, Direction::Output)?;
        let actuator = Self {
            port,
            pin,
            active_low: threshold.is_active_low(),
            latch: Latch::new(threshold.trigger()),
        };
        actuator.port.set(pin, actuator.level_for(false))?;
        Ok(actuator)
    }

    fn level_for(&self, on: bool) -> Level {
        let level = Level::from(on);
        if self.active_low {
            level.inverted()
        } else {
            level
        }
    }

    /// Feed a value, switching the pin on a transition
    pub fn update(&mut self, value: f32) -> Result<Option<Edge>, GpioFault> {
        let previous = self.latch.clone();
        let Some(edge) = self.latch.update(value) else {
            return Ok(None);
        };
        if let Err(fault) = self.port.set(self.pin, self.level_for(edge == Edge::On)) {
            self.latch = previous;
            return Err(fault);
        }
        Ok(Some(edge))
    }

    /// Drive the pin inactive and release the latch
    pub fn release(&mut self) -> Result<(), GpioFault> {
        self.latch.reset();
        self.port.set(self.pin, self.level_for(false))
    }

    /// Actuator pin
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Whether the output is currently active
    pub fn is_on(&self) -> bool {
        self.latch.is_on()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MemoryGpio;

    fn setup(threshold: ActuatorThreshold) -> (Arc<MemoryGpio>, Actuator) {
        let gpio = Arc::new(MemoryGpio::new());
        let actuator = Actuator::new(gpio.clone(), threshold).unwrap();
        (gpio, actuator)
    }

    #[test]
    fn pin_follows_latch() {
        let (gpio, mut actuator) =
            setup(ActuatorThreshold::new(18, Some(200.0), None, Some(20.0)).unwrap());
        assert_eq!(gpio.read(18).unwrap(), Level::Low);

        assert_eq!(actuator.update(500.0).unwrap(), None);
        assert_eq!(actuator.update(150.0).unwrap(), Some(Edge::On));
        assert_eq!(gpio.read(18).unwrap(), Level::High);

        // Chatter inside the band leaves the pin alone
        for value in [205.0, 190.0, 215.0, 199.0] {
            assert_eq!(actuator.update(value).unwrap(), None);
        }
        assert_eq!(actuator.update(221.0).unwrap(), Some(Edge::Off));
        assert_eq!(gpio.read(18).unwrap(), Level::Low);

        // Initial drive plus two transitions
        assert_eq!(gpio.writes(18), 3);
    }

    #[test]
    fn active_low_inverts_level() {
        let threshold = ActuatorThreshold::new(9, None, Some(10.0), None)
            .unwrap()
            .active_low(true);
        let (gpio, mut actuator) = setup(threshold);
        assert_eq!(gpio.read(9).unwrap(), Level::High);

        actuator.update(12.0).unwrap();
        assert_eq!(gpio.read(9).unwrap(), Level::Low);

        actuator.release().unwrap();
        assert_eq!(gpio.read(9).unwrap(), Level::High);
        assert!(!actuator.is_on());
    }

    #[test]
    fn invalid_pin_fails_construction() {
        let gpio = Arc::new(MemoryGpio::new());
        let threshold = ActuatorThreshold::new(250, Some(1.0), None, None).unwrap();
        assert_eq!(
            Actuator::new(gpio, threshold).unwrap_err(),
            GpioFault::InvalidPin { pin: 250 }
        );
    }

    #[test]
    fn failed_write_rolls_back_latch() {
        let gpio = Arc::new(MemoryGpio::new());
        let mut actuator =
            Actuator::new(gpio.clone(), ActuatorThreshold::new(3, None, Some(1.0), None).unwrap())
                .unwrap();

        // Someone reconfigures the pin under us
        gpio.configure(3, Direction::Input).unwrap();
        assert!(actuator.update(5.0).is_err());
        assert!(!actuator.is_on());

        gpio.configure(3, Direction::Output).unwrap();
        assert_eq!(actuator.update(5.0).unwrap(), Some(Edge::On));
    }
}
