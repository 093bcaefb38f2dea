//! # luxbridge agent
//!
//! The long-running half of luxbridge: the components built on
//! `luxbridge-core` and `luxbridge-connectors`, and the supervisor that wires
//! them up from one configuration file.
//!
//! - [`SensorBridge`]: polls the LDR, publishes readings, drives a pin
//! - [`LightListener`]: rolling average over raw readings, threshold events
//! - [`Supervisor`]: optional-component wiring, shutdown fan-out
//! - [`AgentConfig`]: `[MQTT]`, `[LDR]` and `[LightCalculator]` sections
//!
//! ```rust,no_run
//! use luxbridge_agent::{AgentConfig, Supervisor};
//! use luxbridge_connectors::Shutdown;
//!
//! # async fn run() -> Result<(), luxbridge_agent::AgentError> {
//! let config = AgentConfig::load("/etc/luxbridge.ini")?;
//! let stop = Shutdown::new();
//! let summary = Supervisor::new(config).run(stop.signal()).await?;
//! log::info!("{summary:?}");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod listener;
pub mod supervisor;

pub use bridge::{BridgeSettings, BridgeStats, SensorBridge};
pub use config::{AgentConfig, LdrSection, LightCalculatorSection, MqttSection};
pub use error::AgentError;
pub use listener::{LightListener, ListenerSettings, ListenerStats};
pub use supervisor::{wait_for_signal, RunSummary, Supervisor};

/// Agent version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
