//! In-process broker
//!
//! Routes publishes between sessions opened through [`LoopbackTransport`],
//! keeps a log of everything published, and lets a test script the broker's
//! behaviour: refuse the next connects, reject credentials, or drop every
//! live session as if the network went away.
//!
//! Connect attempts are stamped with [`tokio::time::Instant`], so under a
//! paused test clock the reconnect schedule can be asserted exactly.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::topic;
use super::transport::{Inbound, Link, Message, Session, Transport};
use super::{MqttConfig, MqttError, QoS};

struct LiveSession {
    id: u64,
    client_id: String,
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct BrokerState {
    sessions: Vec<LiveSession>,
    next_id: u64,
    fail_next: u32,
    reject_auth: bool,
    attempts: Vec<Instant>,
    published: Vec<Message>,
    subscribe_log: Vec<String>,
}

impl BrokerState {
    fn route(&mut self, message: Message) {
        for session in &self.sessions {
            if session.filters.iter().any(|f| topic::matches(f, &message.topic)) {
                // Receiver gone means the session is being torn down
                let _ = session.tx.send(message.clone());
            }
        }
        self.published.push(message);
    }
}

/// Shared handle to one in-process broker
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LoopbackBroker {
    /// Empty broker accepting every connect
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transport opening sessions on this broker
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport { broker: self.clone() }
    }

    /// Refuse the next `count` connect attempts with a transport error
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Reject every connect with an authentication error
    pub fn reject_credentials(&self, reject: bool) {
        self.lock().reject_auth = reject;
    }

    /// Sever every live session
    pub fn drop_sessions(&self) {
        self.lock().sessions.clear();
    }

    /// Publish from an outside client
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.lock().route(Message::new(topic, payload));
    }

    /// When each connect attempt arrived
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Every message published so far, in order
    pub fn published(&self) -> Vec<Message> {
        self.lock().published.clone()
    }

    /// Messages published on topics matching `filter`
    pub fn published_on(&self, filter: &str) -> Vec<Message> {
        self.lock()
            .published
            .iter()
            .filter(|m| topic::matches(filter, &m.topic))
            .cloned()
            .collect()
    }

    /// Every SUBSCRIBE received, across sessions, in order
    pub fn subscribe_log(&self) -> Vec<String> {
        self.lock().subscribe_log.clone()
    }

    /// Client ids of live sessions
    pub fn clients(&self) -> Vec<String> {
        self.lock().sessions.iter().map(|s| s.client_id.clone()).collect()
    }
}

/// [`Transport`] opening sessions on a [`LoopbackBroker`]
#[derive(Clone)]
pub struct LoopbackTransport {
    broker: LoopbackBroker,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, config: &MqttConfig) -> Result<Session, MqttError> {
        let mut state = self.broker.lock();
        state.attempts.push(Instant::now());

        if state.reject_auth {
            return Err(MqttError::Auth("not authorized".into()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(MqttError::Transport("connection refused".into()));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.push(LiveSession {
            id,
            client_id: config.client_id.clone(),
            filters: Vec::new(),
            tx,
        });

        Ok(Session {
            link: Arc::new(LoopbackLink { broker: self.broker.clone(), id }),
            inbound: Box::new(LoopbackInbound { rx }),
        })
    }
}

struct LoopbackLink {
    broker: LoopbackBroker,
    id: u64,
}

impl Link for LoopbackLink {
    fn try_publish(
        &self,
        topic: &str,
        _qos: QoS,
        _retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        let mut state = self.broker.lock();
        if !state.sessions.iter().any(|s| s.id == self.id) {
            return Err(MqttError::Transport("session closed".into()));
        }
        state.route(Message::new(topic, payload));
        Ok(())
    }

    fn try_subscribe(&self, filter: &str, _qos: QoS) -> Result<(), MqttError> {
        let mut state = self.broker.lock();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == self.id)
            .ok_or_else(|| MqttError::Transport("session closed".into()))?;
        if !session.filters.iter().any(|f| f == filter) {
            session.filters.push(filter.to_string());
        }
        state.subscribe_log.push(filter.to_string());
        Ok(())
    }

    fn disconnect(&self) {
        self.broker.lock().sessions.retain(|s| s.id != self.id);
    }
}

struct LoopbackInbound {
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl Inbound for LoopbackInbound {
    async fn recv(&mut self) -> Result<Message, MqttError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| MqttError::Transport("connection reset by broker".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig::new("loopback", 1883, "test")
    }

    #[tokio::test]
    async fn routes_by_filter() {
        let broker = LoopbackBroker::new();
        let mut session = broker.transport().connect(&config()).await.unwrap();
        session.link.try_subscribe("sensors/+/light", QoS::AtMostOnce).unwrap();

        broker.inject("sensors/1/light", b"12".to_vec());
        broker.inject("sensors/1/temp", b"20".to_vec());

        let message = session.inbound.recv().await.unwrap();
        assert_eq!(message, Message::new("sensors/1/light", b"12".to_vec()));
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let broker = LoopbackBroker::new();
        broker.fail_next_connects(1);
        assert!(matches!(
            broker.transport().connect(&config()).await,
            Err(MqttError::Transport(_))
        ));

        let mut session = broker.transport().connect(&config()).await.unwrap();
        broker.drop_sessions();
        assert!(session.inbound.recv().await.is_err());
        assert!(session.link.try_publish("a", QoS::AtMostOnce, false, vec![]).is_err());

        broker.reject_credentials(true);
        assert!(matches!(
            broker.transport().connect(&config()).await,
            Err(MqttError::Auth(_))
        ));
        assert_eq!(broker.connect_attempts().len(), 3);
    }
}
