//! Error Types for the Sensor-to-Actuator Control Loop
//!
//! ## Design Philosophy
//!
//! Every error in luxbridge belongs to one of two camps, and the camp decides
//! who handles it:
//!
//! 1. **Recoverable at the component boundary**: a failed sensor read or a
//!    payload that cannot be decoded. The owning component logs it and moves on
//!    to the next cycle or message. These never travel further up.
//!
//! 2. **Surfaced to the direct caller**: GPIO faults and invalid configuration.
//!    Hardware faults are returned synchronously and are never retried here.
//!
//! Transport and authentication errors live in `luxbridge-connectors` next to
//! the broker client that produces them.
//!
//! ## Error Categories
//!
//! ### Hardware
//! - `GpioFault`: invalid pin, wrong direction, pin already owned, sysfs failure
//!
//! ### Sensor link
//! - `SensorReadError`: timeout, empty or garbled line, serial link down
//!
//! ### Data
//! - `DecodeError`: reading payload is neither JSON nor a plain number
//!
//! ### Configuration
//! - `ThresholdError`: inconsistent hysteresis settings
//! - `WindowError`: zero-sized averaging window
//!
//! ## Handling Strategy
//!
//! ```rust
//! use luxbridge_core::{GpioFault, SensorReadError};
//!
//! fn on_cycle(read: Result<f32, SensorReadError>) -> Option<f32> {
//!     match read {
//!         Ok(value) => Some(value),
//!         // Skip this cycle, the next poll retries
//!         Err(SensorReadError::Timeout { .. }) => None,
//!         Err(_) => None,
//!     }
//! }
//!
//! fn on_actuate(result: Result<(), GpioFault>) {
//!     if let Err(fault) = result {
//!         // Surfaced to us, we decide. Nobody retries underneath.
//!         let _ = fault.pin();
//!     }
//! }
//! ```

use alloc::string::String;
use thiserror_no_std::Error;

/// Faults raised by a [`GpioPort`](crate::gpio::GpioPort) backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpioFault {
    /// Pin number outside what the backend can drive
    #[error("Invalid GPIO pin {pin}")]
    InvalidPin {
        /// Requested pin number
        pin: u8,
    },

    /// Pin direction does not allow the operation (e.g. set on an input)
    #[error("GPIO pin {pin} is not configured as {expected}")]
    WrongDirection {
        /// Pin number
        pin: u8,
        /// Direction the operation needs
        expected: &'static str,
    },

    /// Pin was never configured
    #[error("GPIO pin {pin} is not configured")]
    NotConfigured {
        /// Pin number
        pin: u8,
    },

    /// Another component already owns the pin
    #[error("GPIO pin {pin} is already owned by {owner}")]
    PinInUse {
        /// Pin number
        pin: u8,
        /// Name of the component holding the claim
        owner: String,
    },

    /// Backend failed to talk to the hardware
    #[error("GPIO hardware fault on pin {pin}: {reason}")]
    Hardware {
        /// Pin number
        pin: u8,
        /// Backend specific description
        reason: String,
    },
}

impl GpioFault {
    /// Pin the fault relates to
    pub fn pin(&self) -> u8 {
        match self {
            Self::InvalidPin { pin }
            | Self::WrongDirection { pin, .. }
            | Self::NotConfigured { pin }
            | Self::PinInUse { pin, .. }
            | Self::Hardware { pin, .. } => *pin,
        }
    }
}

/// A single failed read from the microcontroller link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorReadError {
    /// No complete line arrived within the read timeout
    #[error("Sensor read timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Line arrived but carried nothing
    #[error("Sensor sent an empty line")]
    Empty,

    /// Line could not be parsed as a light value
    #[error("Unparsable sensor line: {line:?}")]
    Malformed {
        /// Offending line, trimmed
        line: String,
    },

    /// Device could not be opened or the link dropped
    #[error("Sensor link unavailable: {reason}")]
    Link {
        /// Underlying I/O description
        reason: String,
    },
}

/// Reading payload could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not UTF-8
    #[error("Payload is not valid UTF-8")]
    NotUtf8,

    /// Payload is neither a JSON reading nor a plain number
    #[error("Unrecognised reading payload: {reason}")]
    Format {
        /// Decoder message
        reason: String,
    },

    /// Value decoded but is NaN or infinite
    #[error("Reading value is not a finite number")]
    NotFinite,
}

/// Inconsistent threshold configuration
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ThresholdError {
    /// Neither `on_below` nor `on_above` was given
    #[error("Threshold needs at least one of on_below / on_above")]
    Unbounded,

    /// Hysteresis must be a non-negative finite value
    #[error("Hysteresis {hysteresis} must be finite and >= 0")]
    InvalidHysteresis {
        /// Configured band
        hysteresis: f32,
    },

    /// Threshold value is NaN or infinite
    #[error("Threshold {value} is not a finite number")]
    NotFinite {
        /// Configured threshold
        value: f32,
    },

    /// Lower trigger sits above the upper one
    #[error("on_below {on_below} exceeds on_above {on_above}")]
    Inverted {
        /// Lower trigger
        on_below: f32,
        /// Upper trigger
        on_above: f32,
    },
}

/// Invalid averaging window configuration
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    /// Count windows need at least one slot
    #[error("Window size must be at least 1")]
    ZeroSize,

    /// Time windows need a positive span
    #[error("Window duration must be greater than zero")]
    ZeroDuration,

    /// Requested size exceeds the hard cap
    #[error("Window size {size} exceeds maximum {max}")]
    TooLarge {
        /// Requested size
        size: usize,
        /// Hard cap
        max: usize,
    },
}
