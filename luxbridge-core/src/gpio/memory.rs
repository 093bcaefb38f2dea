//! In-memory pin table

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::constants::MEMORY_GPIO_PINS;
use crate::errors::GpioFault;

use super::{Direction, GpioPort, Level};

// Packed pin state
const UNCONFIGURED: u8 = 0;
const INPUT: u8 = 0b01;
const OUTPUT: u8 = 0b10;
const HIGH: u8 = 0b100;

/// Lock-free pin table
///
/// Stands in for real hardware on development hosts. Tests can drive input
/// pins with [`MemoryGpio::drive_input`] and count output writes.
#[derive(Debug)]
pub struct MemoryGpio {
    pins: [AtomicU8; MEMORY_GPIO_PINS],
    writes: [AtomicU32; MEMORY_GPIO_PINS],
}

impl MemoryGpio {
    /// All pins unconfigured
    pub fn new() -> Self {
        Self {
            pins: core::array::from_fn(|_| AtomicU8::new(UNCONFIGURED)),
            writes: core::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    fn slot(&self, pin: u8) -> Result<&AtomicU8, GpioFault> {
        self.pins.get(pin as usize).ok_or(GpioFault::InvalidPin { pin })
    }

    /// Simulate an external signal on an input pin
    pub fn drive_input(&self, pin: u8, level: Level) -> Result<(), GpioFault> {
        let slot = self.slot(pin)?;
        let state = slot.load(Ordering::Acquire);
        if state & INPUT == 0 {
            return Err(GpioFault::WrongDirection { pin, expected: Direction::Input.as_str() });
        }
        slot.store(INPUT | level_bits(level), Ordering::Release);
        Ok(())
    }

    /// Number of `set` calls that reached `pin`
    pub fn writes(&self, pin: u8) -> u32 {
        self.writes
            .get(pin as usize)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Direction of `pin`, `None` if unconfigured or out of range
    pub fn direction(&self, pin: u8) -> Option<Direction> {
        match self.slot(pin).ok()?.load(Ordering::Acquire) & (INPUT | OUTPUT) {
            INPUT => Some(Direction::Input),
            OUTPUT => Some(Direction::Output),
            _ => None,
        }
    }
}

impl Default for MemoryGpio {
    fn default() -> Self {
        Self::new()
    }
}

fn level_bits(level: Level) -> u8 {
    match level {
        Level::High => HIGH,
        Level::Low => 0,
    }
}

impl GpioPort for MemoryGpio {
    fn configure(&self, pin: u8, direction: Direction) -> Result<(), GpioFault> {
        let bits = match direction {
            Direction::Input => INPUT,
            Direction::Output => OUTPUT,
        };
        // Reconfiguring resets the level
        self.slot(pin)?.store(bits, Ordering::Release);
        Ok(())
    }

    fn set(&self, pin: u8, level: Level) -> Result<(), GpioFault> {
        let slot = self.slot(pin)?;
        if slot.load(Ordering::Acquire) & OUTPUT == 0 {
            return Err(GpioFault::WrongDirection { pin, expected: Direction::Output.as_str() });
        }
        slot.store(OUTPUT | level_bits(level), Ordering::Release);
        self.writes[pin as usize].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level, GpioFault> {
        let state = self.slot(pin)?.load(Ordering::Acquire);
        if state == UNCONFIGURED {
            return Err(GpioFault::NotConfigured { pin });
        }
        Ok(Level::from(state & HIGH != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_roundtrip() {
        let gpio = MemoryGpio::new();
        gpio.configure(4, Direction::Output).unwrap();
        assert_eq!(gpio.read(4).unwrap(), Level::Low);

        gpio.set(4, Level::High).unwrap();
        assert_eq!(gpio.read(4).unwrap(), Level::High);
        assert_eq!(gpio.writes(4), 1);
        assert_eq!(gpio.direction(4), Some(Direction::Output));
    }

    #[test]
    fn faults_surface_to_caller() {
        let gpio = MemoryGpio::new();

        assert_eq!(gpio.read(3), Err(GpioFault::NotConfigured { pin: 3 }));
        assert_eq!(
            gpio.set(200, Level::High),
            Err(GpioFault::InvalidPin { pin: 200 })
        );

        gpio.configure(5, Direction::Input).unwrap();
        assert!(matches!(
            gpio.set(5, Level::High),
            Err(GpioFault::WrongDirection { pin: 5, .. })
        ));
        assert_eq!(gpio.writes(5), 0);
    }

    #[test]
    fn inputs_follow_simulated_signal() {
        let gpio = MemoryGpio::new();
        gpio.configure(7, Direction::Input).unwrap();
        gpio.drive_input(7, Level::High).unwrap();
        assert_eq!(gpio.read(7).unwrap(), Level::High);

        gpio.configure(8, Direction::Output).unwrap();
        assert!(gpio.drive_input(8, Level::High).is_err());
    }
}
