//! Control-loop logic for luxbridge
//!
//! Everything here is pure and synchronous: reading codecs, the rolling
//! average window, hysteresis latches, pin abstraction and the event
//! payloads. I/O lives in `luxbridge-connectors`, wiring in
//! `luxbridge-agent`.
//!
//! Builds without `std` (plus `alloc`) so the same logic can run on the
//! microcontroller side of the link.
//!
//! ```rust
//! use luxbridge_core::{Latch, Reading, SampleWindow, Trigger, WindowSpec};
//!
//! let mut window = SampleWindow::new(WindowSpec::Count { size: 4 }).unwrap();
//! let mut latch = Latch::new(Trigger::below(200.0, 25.0).unwrap());
//!
//! for (t, value) in [480.0, 300.0, 50.0, 40.0].into_iter().enumerate() {
//!     window.push(Reading::new("ldr", value, t as u64 * 1000));
//!     let average = window.average().unwrap();
//!     if let Some(edge) = latch.update(average) {
//!         // average went 480, 390, 276.7, 217.5: no crossing yet
//!         let _ = edge;
//!     }
//! }
//! assert!(!latch.is_on());
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

pub mod actuator;
pub mod constants;
pub mod errors;
pub mod events;
pub mod gpio;
pub mod reading;
pub mod threshold;
pub mod time;
pub mod window;

// Public API
pub use actuator::Actuator;
pub use errors::{DecodeError, GpioFault, SensorReadError, ThresholdError, WindowError};
pub use events::{StatusEvent, ThresholdEvent};
pub use gpio::{Direction, GpioPort, Level, MemoryGpio, PinClaims};
pub use reading::{Reading, ReadingPayload};
pub use threshold::{ActuatorThreshold, Edge, Latch, Trigger};
pub use time::{MockTimeSource, TimeSource, Timestamp};
pub use window::{SampleWindow, WindowSpec};

#[cfg(feature = "std")]
pub use gpio::SysfsGpio;
#[cfg(feature = "std")]
pub use time::MonotonicTime;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
