//! Seam between the client state machine and the wire

use std::sync::Arc;

use async_trait::async_trait;

use super::{MqttConfig, MqttError, QoS};

/// One inbound application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

/// Established connection, split into its outbound and inbound halves
pub struct Session {
    /// Outbound half, shared with publishers
    pub link: Arc<dyn Link>,
    /// Inbound half, owned by the connection task
    pub inbound: Box<dyn Inbound>,
}

/// Opens sessions with a broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and wait for the broker to accept the session
    ///
    /// Credential rejection must surface as [`MqttError::Auth`], everything
    /// else as [`MqttError::Transport`].
    async fn connect(&self, config: &MqttConfig) -> Result<Session, MqttError>;
}

/// Outbound half of a session, every call returns without waiting
pub trait Link: Send + Sync {
    /// Queue a publish
    fn try_publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>)
        -> Result<(), MqttError>;

    /// Queue a subscription
    fn try_subscribe(&self, filter: &str, qos: QoS) -> Result<(), MqttError>;

    /// Queue a clean disconnect, best effort
    fn disconnect(&self);
}

/// Inbound half of a session
#[async_trait]
pub trait Inbound: Send {
    /// Next application message, or the error that ended the session
    async fn recv(&mut self) -> Result<Message, MqttError>;

    /// Flush queued outbound packets after [`Link::disconnect`]
    async fn close(&mut self) {}
}
