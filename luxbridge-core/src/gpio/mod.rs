//! Digital Pin Abstraction
//!
//! [`GpioPort`] is a pure side-effecting wrapper: it writes and reads pin
//! levels and nothing else. There is no retry and no arbitration underneath.
//! A failed operation comes straight back to the caller as a [`GpioFault`].
//!
//! Two backends ship with the crate:
//! - [`MemoryGpio`]: atomic pin table for hosts without pins, and for tests
//! - [`SysfsGpio`]: the Linux `/sys/class/gpio` interface (std only)
//!
//! Ownership is decided once at startup through [`PinClaims`]. Each pin has
//! exactly one owner for the lifetime of the process.
//!
//! ```rust
//! use luxbridge_core::gpio::{Direction, GpioPort, Level, MemoryGpio};
//!
//! let gpio = MemoryGpio::new();
//! gpio.configure(18, Direction::Output).unwrap();
//! gpio.set(18, Level::High).unwrap();
//! assert_eq!(gpio.read(18).unwrap(), Level::High);
//! ```

mod memory;
#[cfg(feature = "std")]
mod sysfs;

pub use memory::MemoryGpio;
#[cfg(feature = "std")]
pub use sysfs::{SysfsGpio, DEFAULT_SYSFS_GPIO};

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::errors::GpioFault;

/// Logic level of a digital pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// 0V
    Low,
    /// Supply voltage
    High,
}

impl Level {
    /// Opposite level
    pub const fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Pin is sampled
    Input,
    /// Pin is driven
    Output,
}

impl Direction {
    /// Name used in fault messages and sysfs
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }
}

/// Digital pin driver
///
/// All methods take `&self` so a single port can be shared behind an `Arc`
/// by the sensor bridge and the light listener, each driving its own pin.
pub trait GpioPort: Send + Sync {
    /// Set the pin direction, exporting the pin first if the backend needs it
    fn configure(&self, pin: u8, direction: Direction) -> Result<(), GpioFault>;

    /// Drive an output pin
    fn set(&self, pin: u8, level: Level) -> Result<(), GpioFault>;

    /// Sample the current level of a configured pin
    fn read(&self, pin: u8) -> Result<Level, GpioFault>;
}

/// Startup-time registry of pin owners
///
/// Built by whoever wires the components together, then dropped. Nothing
/// consults it at runtime.
#[derive(Debug, Default)]
pub struct PinClaims {
    owners: BTreeMap<u8, String>,
}

impl PinClaims {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `owner` as the sole user of `pin`
    pub fn claim(&mut self, pin: u8, owner: &str) -> Result<(), GpioFault> {
        if let Some(existing) = self.owners.get(&pin) {
            return Err(GpioFault::PinInUse { pin, owner: existing.clone() });
        }
        self.owners.insert(pin, owner.into());
        Ok(())
    }

    /// Current owner of `pin`
    pub fn owner(&self, pin: u8) -> Option<&str> {
        self.owners.get(&pin).map(String::as_str)
    }

    /// Number of claimed pins
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// True when no pin is claimed
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_rejected() {
        let mut claims = PinClaims::new();
        claims.claim(18, "ldr").unwrap();
        claims.claim(23, "light_calculator").unwrap();

        let err = claims.claim(18, "light_calculator").unwrap_err();
        assert_eq!(err, GpioFault::PinInUse { pin: 18, owner: "ldr".into() });
        assert_eq!(claims.owner(18), Some("ldr"));
        assert_eq!(claims.len(), 2);
    }

    #[test]
    fn level_helpers() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::High.inverted(), Level::Low);
        assert_eq!(Direction::Output.as_str(), "out");
    }
}
