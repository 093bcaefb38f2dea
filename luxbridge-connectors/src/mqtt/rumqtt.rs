//! rumqttc-backed transport
//!
//! A fresh `AsyncClient`/`EventLoop` pair is created per attempt. The event
//! loop's own reconnect is never used: once a poll fails the session is
//! over and the client's backoff decides when to try again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use luxbridge_core::constants::buffers::DEFAULT_REQUEST_QUEUE;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet,
};

use super::transport::{Inbound, Link, Message, Session, Transport};
use super::{MqttConfig, MqttError, QoS, STATUS_OFFLINE};

/// How long `close` keeps polling to flush the DISCONNECT
const CLOSE_FLUSH: Duration = Duration::from_millis(500);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

fn classify(err: ConnectionError) -> MqttError {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => MqttError::Auth(format!("broker refused connection: {code:?}")),
        other => MqttError::Transport(other.to_string()),
    }
}

/// Real broker over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttTransport;

impl RumqttTransport {
    fn options(config: &MqttConfig) -> MqttOptions {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keepalive);
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }
        if let Some(topic) = &config.status_topic {
            options.set_last_will(LastWill::new(
                topic,
                STATUS_OFFLINE.to_vec(),
                rumqttc::QoS::AtLeastOnce,
                true,
            ));
        }
        options
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(&self, config: &MqttConfig) -> Result<Session, MqttError> {
        let (client, mut eventloop) =
            AsyncClient::new(Self::options(config), DEFAULT_REQUEST_QUEUE);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!("CONNACK from {}:{} ({:?})", config.host, config.port, ack.code);
                    break;
                }
                Ok(_) => {}
                Err(err) => return Err(classify(err)),
            }
        }

        Ok(Session {
            link: Arc::new(RumqttLink { client }),
            inbound: Box::new(RumqttInbound { eventloop }),
        })
    }
}

struct RumqttLink {
    client: AsyncClient,
}

impl Link for RumqttLink {
    fn try_publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        self.client
            .try_publish(topic, qos.into(), retain, payload)
            .map_err(|e| MqttError::Transport(e.to_string()))
    }

    fn try_subscribe(&self, filter: &str, qos: QoS) -> Result<(), MqttError> {
        self.client
            .try_subscribe(filter, qos.into())
            .map_err(|e| MqttError::Transport(e.to_string()))
    }

    fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect not queued: {e}");
        }
    }
}

struct RumqttInbound {
    eventloop: EventLoop,
}

#[async_trait]
impl Inbound for RumqttInbound {
    async fn recv(&mut self) -> Result<Message, MqttError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(Message::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return Err(MqttError::Transport("broker closed the session".into()));
                }
                Ok(_) => {}
                Err(err) => return Err(classify(err)),
            }
        }
    }

    async fn close(&mut self) {
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(CLOSE_FLUSH, flush).await.is_err() {
            debug!("DISCONNECT not flushed within {CLOSE_FLUSH:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_refusals_are_auth() {
        let err = classify(ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized));
        assert!(err.is_fatal());
        let err = classify(ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        assert!(matches!(err, MqttError::Auth(_)));
    }

    #[test]
    fn other_refusals_are_transient() {
        let err = classify(ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable,
        ));
        assert!(matches!(err, MqttError::Transport(_)));
    }

    #[test]
    fn options_carry_endpoint_and_will() {
        let config = MqttConfig::new("broker.local", 1884, "lux-1")
            .credentials("sensor", "secret")
            .status_topic("sensornetwork/luxbridge/status");
        let options = RumqttTransport::options(&config);

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "lux-1");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.last_will().is_some());
    }
}
