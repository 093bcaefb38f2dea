//! I/O Connectors for the luxbridge Control Loop
//!
//! ## Overview
//!
//! Everything that touches the outside world apart from GPIO lives here:
//!
//! - [`mqtt`]: the broker client, reconnecting with backoff and dispatching
//!   inbound messages to topic-pattern callbacks
//! - [`source`] and [`serial`]: where raw light values come from, and the
//!   microcontroller link the LDR is read through
//! - [`backoff`] and [`shutdown`]: the two pieces of plumbing every long
//!   running task here shares
//!
//! ## Publish Policy
//!
//! Publishing never waits for the network. While the broker is reachable a
//! message is queued on the client; while it is not the message is dropped
//! and counted in [`ConnectionStats::messages_dropped`]. Light readings are
//! superseded every poll interval, so an old reading delivered late is worth
//! less than an up-to-date control loop.
//!
//! ```text
//!   publish() ──┬── Connected ──▶ request queue ──▶ broker    Delivery::Queued
//!               └── otherwise ──▶ counter + log               Delivery::Dropped
//! ```
//!
//! The first drop after the connection goes down is logged at `warn`, the
//! rest at `debug`, so an outage produces one line rather than one per poll.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use luxbridge_connectors::mqtt::{BrokerClient, MqttConfig, QoS};
//! use luxbridge_connectors::{Delivery, Shutdown};
//!
//! # async fn run() -> Result<(), luxbridge_connectors::mqtt::MqttError> {
//! let client = BrokerClient::new(MqttConfig::new("localhost", 1883, "luxbridge"))?;
//! let shutdown = Shutdown::new();
//! let _task = client.connect_async(shutdown.signal())?;
//!
//! match client.publish("sensornetwork/ldr/light", b"512".to_vec(), QoS::AtMostOnce, false) {
//!     Delivery::Queued => {}
//!     Delivery::Dropped => log::debug!("broker down, reading skipped"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod mqtt;
#[cfg(feature = "serial")]
pub mod serial;
pub mod shutdown;
pub mod source;

// Re-export common types
pub use backoff::Backoff;
pub use mqtt::{BrokerClient, ConnectionState, MqttConfig, MqttError, QoS, WeakBrokerClient};
#[cfg(feature = "serial")]
pub use serial::{SerialConfig, SerialLightSource};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use source::LightSource;

/// Outcome of a publish, never an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the connection for sending
    Queued,
    /// Discarded because the broker is unavailable
    Dropped,
}

impl Delivery {
    /// Whether the message was queued
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued)
    }
}

/// Connection statistics kept by the broker client
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total messages queued for sending
    pub messages_sent: u64,
    /// Total messages dropped while disconnected
    pub messages_dropped: u64,
    /// Total payload bytes queued
    pub bytes_sent: u64,
    /// Successful connects after the first
    pub reconnections: u32,
    /// Last error message
    pub last_error: Option<String>,
}
