//! MQTT Broker Client
//!
//! ## Overview
//!
//! [`BrokerClient`] owns the one broker connection of the agent. It is built
//! around three promises:
//!
//! - **Never block the caller**: `connect_async` spawns the connection task
//!   and returns, `publish` either queues or drops immediately
//! - **Always come back**: transport loss leads to reconnection with
//!   exponential backoff (1s doubling to 60s), resubscribing every registered
//!   pattern each time
//! - **Stop on credentials**: an authentication rejection is terminal
//!   ([`ConnectionState::Fatal`]), retrying would only lock the account
//!
//! ## State Machine
//!
//! ```text
//!                 connect_async
//!  Disconnected ───────────────▶ Connecting ──── ok ───▶ Connected
//!       ▲                          │  ▲                     │
//!       │ shutdown                 │  │ backoff elapsed     │ transport lost
//!       │                          │  │                     ▼
//!       └──────── (any) ◀──────────┤  └──────────────── Reconnecting
//!                                  │
//!                                  └── auth rejected ──▶ Fatal
//! ```
//!
//! ## Transports
//!
//! The client drives a [`Transport`]. [`RumqttTransport`] talks to a real
//! broker through rumqttc; [`LoopbackBroker`] is an in-process broker with
//! failure injection used by the test suites.
//!
//! ## Example
//!
//! ```rust,no_run
//! use luxbridge_connectors::mqtt::{BrokerClient, MqttConfig, QoS};
//! use luxbridge_connectors::Shutdown;
//!
//! # async fn run() -> Result<(), luxbridge_connectors::mqtt::MqttError> {
//! let config = MqttConfig::new("broker.local", 1883, "luxbridge-01")
//!     .credentials("sensor", "secret");
//! let client = BrokerClient::new(config)?;
//!
//! client.register_callback("sensors/+/light", |topic, payload| {
//!     log::info!("{topic}: {} bytes", payload.len());
//! })?;
//!
//! let shutdown = Shutdown::new();
//! let task = client.connect_async(shutdown.signal())?;
//!
//! client.publish("sensornetwork/ldr/light", b"512".to_vec(), QoS::AtMostOnce, false);
//!
//! shutdown.trigger();
//! task.await.ok();
//! # Ok(())
//! # }
//! ```

mod client;
pub mod loopback;
#[cfg(feature = "mqtt")]
mod rumqtt;
pub mod topic;
mod transport;

use std::time::Duration;

use luxbridge_core::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS, DEFAULT_KEEPALIVE_S,
};
use thiserror::Error;

pub use client::{BrokerClient, Handler, WeakBrokerClient};
pub use loopback::{LoopbackBroker, LoopbackTransport};
#[cfg(feature = "mqtt")]
pub use rumqtt::RumqttTransport;
pub use transport::{Inbound, Link, Message, Session, Transport};

/// Payload of the retained status message while connected
pub const STATUS_ONLINE: &[u8] = b"online";
/// Payload of the last will, and of the status message on clean shutdown
pub const STATUS_OFFLINE: &[u8] = b"offline";

/// Shortest keepalive accepted
const MIN_KEEPALIVE: Duration = Duration::from_secs(5);

/// Connection lifecycle, owned by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or cleanly stopped
    Disconnected,
    /// Attempt in flight
    Connecting,
    /// Session established, publishes are queued
    Connected,
    /// Waiting out the backoff delay
    Reconnecting,
    /// Authentication rejected, no further attempts
    Fatal,
}

impl ConnectionState {
    /// Whether the connection task has given up for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Fatal)
    }
}

/// Delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce,
    /// Acknowledged, may duplicate
    AtLeastOnce,
    /// Exactly once handshake
    ExactlyOnce,
}

/// Broker client errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MqttError {
    /// Network level failure, retried with backoff
    #[error("MQTT transport error: {0}")]
    Transport(String),

    /// Credentials rejected, terminal
    #[error("MQTT authentication failed: {0}")]
    Auth(String),

    /// Invalid configuration or topic
    #[error("MQTT configuration error: {0}")]
    Config(String),

    /// `connect_async` was already called on this client
    #[error("MQTT connection task already started")]
    AlreadyStarted,
}

impl MqttError {
    /// Whether retrying can never succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, MqttError::Auth(_))
    }
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// MQTT client identifier
    pub client_id: String,
    /// Optional user name
    pub username: Option<String>,
    /// Optional password, only sent with a user name
    pub password: Option<String>,
    /// Keepalive interval
    pub keepalive: Duration,
    /// First reconnect delay
    pub backoff_base: Duration,
    /// Longest reconnect delay
    pub backoff_cap: Duration,
    /// Retained online/offline topic, also used for the last will
    pub status_topic: Option<String>,
    /// QoS used when subscribing callbacks
    pub subscribe_qos: QoS,
}

impl MqttConfig {
    /// Defaults for everything but the endpoint
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_S),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
            status_topic: None,
            subscribe_qos: QoS::AtLeastOnce,
        }
    }

    /// Authenticate with user name and password
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Override the keepalive interval
    pub fn keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Override the reconnect schedule
    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Publish retained online/offline status on `topic`
    pub fn status_topic(mut self, topic: impl Into<String>) -> Self {
        self.status_topic = Some(topic.into());
        self
    }

    /// Check the settings before any connection attempt
    pub fn validate(&self) -> Result<(), MqttError> {
        if self.host.trim().is_empty() {
            return Err(MqttError::Config("broker host is empty".into()));
        }
        if self.port == 0 {
            return Err(MqttError::Config("broker port must not be 0".into()));
        }
        if self.client_id.is_empty() {
            return Err(MqttError::Config("client id is empty".into()));
        }
        if self.keepalive < MIN_KEEPALIVE {
            return Err(MqttError::Config(format!(
                "keepalive {:?} is shorter than {:?}",
                self.keepalive, MIN_KEEPALIVE
            )));
        }
        if self.backoff_base.is_zero() || self.backoff_cap.is_zero() {
            return Err(MqttError::Config("backoff delays must be positive".into()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(MqttError::Config("password given without username".into()));
        }
        if let Some(topic) = &self.status_topic {
            topic::validate_topic(topic)?;
        }
        Ok(())
    }
}
