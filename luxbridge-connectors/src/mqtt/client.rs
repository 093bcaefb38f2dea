//! Broker client and its connection task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, error, info, warn};
use luxbridge_core::constants::buffers::STATE_CHANNEL_CAPACITY;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::transport::{Link, Message, Transport};
use super::{topic, ConnectionState, MqttConfig, MqttError, QoS, STATUS_OFFLINE, STATUS_ONLINE};
use crate::backoff::Backoff;
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::{ConnectionStats, Delivery};

/// Message callback, called with the concrete topic and raw payload
pub type Handler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Patterns in registration order, each with its handlers in registration
/// order
#[derive(Default)]
struct SubscriptionTable {
    entries: Vec<(String, Vec<Handler>)>,
}

impl SubscriptionTable {
    /// Returns true when `pattern` is new
    fn insert(&mut self, pattern: &str, handler: Handler) -> bool {
        if let Some((_, handlers)) = self.entries.iter_mut().find(|(p, _)| p == pattern) {
            handlers.push(handler);
            return false;
        }
        self.entries.push((pattern.to_string(), vec![handler]));
        true
    }

    fn patterns(&self) -> Vec<String> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }

    fn matching(&self, topic_name: &str) -> Vec<Handler> {
        self.entries
            .iter()
            .filter(|(pattern, _)| topic::matches(pattern, topic_name))
            .flat_map(|(_, handlers)| handlers.iter().cloned())
            .collect()
    }
}

struct Inner {
    config: MqttConfig,
    transport: Arc<dyn Transport>,
    subscriptions: Mutex<SubscriptionTable>,
    link: Mutex<Option<Arc<dyn Link>>>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    stats: Mutex<ConnectionStats>,
    started: AtomicBool,
    drop_warned: AtomicBool,
    closer: Shutdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing panics while holding these locks, but a poisoned table is
    // still consistent
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous == next {
            return;
        }
        debug!("MQTT state {previous:?} -> {next:?}");
        if next == ConnectionState::Connected {
            self.drop_warned.store(false, Ordering::Relaxed);
        }
        // No receivers is fine
        let _ = self.transitions.send(next);
    }

    fn record_error(&self, err: &MqttError) {
        lock(&self.stats).last_error = Some(err.to_string());
    }

    fn current_link(&self) -> Option<Arc<dyn Link>> {
        lock(&self.link).clone()
    }

    fn resubscribe(&self, link: &dyn Link) {
        let patterns = lock(&self.subscriptions).patterns();
        for pattern in patterns {
            match link.try_subscribe(&pattern, self.config.subscribe_qos) {
                Ok(()) => debug!("Subscribed to {pattern}"),
                Err(e) => warn!("Subscribe to {pattern} failed: {e}"),
            }
        }
    }

    fn announce(&self, link: &dyn Link, payload: &[u8]) {
        if let Some(status_topic) = &self.config.status_topic {
            let result = link.try_publish(status_topic, QoS::AtLeastOnce, true, payload.to_vec());
            if let Err(e) = result {
                debug!("Status publish to {status_topic} failed: {e}");
            }
        }
    }

    fn dispatch(&self, message: &Message) {
        // Clone handlers out so a callback may register more callbacks
        let handlers = lock(&self.subscriptions).matching(&message.topic);
        if handlers.is_empty() {
            debug!("No callback for {}", message.topic);
        }
        for handler in handlers {
            handler(&message.topic, &message.payload);
        }
    }

    fn dropped(&self, topic_name: &str, reason: &str) -> Delivery {
        lock(&self.stats).messages_dropped += 1;
        if self.drop_warned.swap(true, Ordering::Relaxed) {
            debug!("Dropped publish to {topic_name}: {reason}");
        } else {
            warn!("Dropping publishes while broker is unavailable ({topic_name}: {reason})");
        }
        Delivery::Dropped
    }
}

/// Handle to the broker connection, cheap to clone
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    /// Client talking to a real broker
    #[cfg(feature = "mqtt")]
    pub fn new(config: MqttConfig) -> Result<Self, MqttError> {
        Self::with_transport(config, Arc::new(super::RumqttTransport))
    }

    /// Client over any transport
    pub fn with_transport(
        config: MqttConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, MqttError> {
        config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                subscriptions: Mutex::new(SubscriptionTable::default()),
                link: Mutex::new(None),
                state,
                transitions,
                stats: Mutex::new(ConnectionStats::default()),
                started: AtomicBool::new(false),
                drop_warned: AtomicBool::new(false),
                closer: Shutdown::new(),
            }),
        })
    }

    /// Settings this client was built with
    pub fn config(&self) -> &MqttConfig {
        &self.inner.config
    }

    /// Handle that does not keep the client alive
    ///
    /// Callbacks that publish through the client holding them should
    /// capture this instead of a clone.
    pub fn downgrade(&self) -> WeakBrokerClient {
        WeakBrokerClient { inner: Arc::downgrade(&self.inner) }
    }

    /// Spawn the connection task and return at once
    ///
    /// The task connects, reconnects with backoff after transport loss, and
    /// resolves to `Ok(())` after `shutdown` (or [`BrokerClient::close`]), or
    /// to `Err(MqttError::Auth)` once the broker rejects the credentials.
    pub fn connect_async(
        &self,
        shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<Result<(), MqttError>>, MqttError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| MqttError::Config("connect_async needs a tokio runtime".into()))?;
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(MqttError::AlreadyStarted);
        }
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.inner.config.host, self.inner.config.port, self.inner.config.client_id
        );
        Ok(runtime.spawn(run_connection(self.inner.clone(), shutdown)))
    }

    /// Call `handler` for every message whose topic matches `pattern`
    ///
    /// May be called before or after connecting, and from inside a
    /// callback. Patterns are (re)subscribed on every connect.
    pub fn register_callback<F>(&self, pattern: &str, handler: F) -> Result<(), MqttError>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        topic::validate_filter(pattern)?;
        let is_new = lock(&self.inner.subscriptions).insert(pattern, Arc::new(handler));

        if is_new && self.is_connected() {
            if let Some(link) = self.inner.current_link() {
                if let Err(e) = link.try_subscribe(pattern, self.inner.config.subscribe_qos) {
                    warn!("Subscribe to {pattern} failed, retried on reconnect: {e}");
                }
            }
        }
        Ok(())
    }

    /// Queue a publish, never blocks
    ///
    /// While the session is down the message is dropped and counted.
    pub fn publish(
        &self,
        topic_name: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Delivery {
        if let Err(e) = topic::validate_topic(topic_name) {
            warn!("Not publishing to invalid topic {topic_name:?}: {e}");
            lock(&self.inner.stats).messages_dropped += 1;
            return Delivery::Dropped;
        }
        if !self.is_connected() {
            return self.inner.dropped(topic_name, "not connected");
        }
        let Some(link) = self.inner.current_link() else {
            return self.inner.dropped(topic_name, "not connected");
        };

        let payload = payload.into();
        let len = payload.len() as u64;
        match link.try_publish(topic_name, qos, retain, payload) {
            Ok(()) => {
                let mut stats = lock(&self.inner.stats);
                stats.messages_sent += 1;
                stats.bytes_sent += len;
                Delivery::Queued
            }
            Err(e) => self.inner.dropped(topic_name, &e.to_string()),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether publishes are currently queued
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Every state transition from now on, in order
    pub fn watch_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.transitions.subscribe()
    }

    /// Latest state, for waiting on a particular one
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ConnectionStats {
        lock(&self.inner.stats).clone()
    }

    /// Stop the connection task, as if its shutdown signal fired
    pub fn close(&self) {
        self.inner.closer.trigger();
        if !self.inner.started.load(Ordering::SeqCst) {
            self.inner.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Non-owning [`BrokerClient`] handle
#[derive(Clone)]
pub struct WeakBrokerClient {
    inner: Weak<Inner>,
}

impl WeakBrokerClient {
    /// The client, unless every owner has gone
    pub fn upgrade(&self) -> Option<BrokerClient> {
        self.inner.upgrade().map(|inner| BrokerClient { inner })
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Resolves when either the owner's signal or `close` fires
async fn stopped(shutdown: &mut ShutdownSignal, closing: &mut ShutdownSignal) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = closing.cancelled() => {}
    }
}

async fn run_connection(inner: Arc<Inner>, mut shutdown: ShutdownSignal) -> Result<(), MqttError> {
    let mut closing = inner.closer.signal();
    let mut backoff = Backoff::new(inner.config.backoff_base, inner.config.backoff_cap);
    let mut connected_before = false;

    loop {
        if shutdown.is_cancelled() || closing.is_cancelled() {
            break;
        }
        inner.set_state(ConnectionState::Connecting);

        let attempt = tokio::select! {
            attempt = inner.transport.connect(&inner.config) => attempt,
            _ = stopped(&mut shutdown, &mut closing) => break,
        };

        match attempt {
            Ok(session) => {
                if connected_before {
                    lock(&inner.stats).reconnections += 1;
                }
                connected_before = true;
                backoff.reset();

                let link = session.link;
                let mut inbound = session.inbound;
                *lock(&inner.link) = Some(link.clone());
                // Connected before the snapshot, so a concurrent
                // register_callback either lands in it or subscribes itself
                inner.set_state(ConnectionState::Connected);
                info!("Connected to MQTT broker {}:{}", inner.config.host, inner.config.port);
                inner.resubscribe(&*link);
                inner.announce(&*link, STATUS_ONLINE);

                let lost = loop {
                    tokio::select! {
                        received = inbound.recv() => match received {
                            Ok(message) => inner.dispatch(&message),
                            Err(err) => break Some(err),
                        },
                        _ = stopped(&mut shutdown, &mut closing) => break None,
                    }
                };
                *lock(&inner.link) = None;

                match lost {
                    None => {
                        inner.announce(&*link, STATUS_OFFLINE);
                        link.disconnect();
                        inbound.close().await;
                        break;
                    }
                    Some(err) => {
                        warn!("Lost connection to MQTT broker: {err}");
                        inner.record_error(&err);
                    }
                }
            }
            Err(err) if err.is_fatal() => {
                error!("{err}, giving up");
                inner.record_error(&err);
                inner.set_state(ConnectionState::Fatal);
                return Err(err);
            }
            Err(err) => {
                warn!("MQTT connection attempt failed: {err}");
                inner.record_error(&err);
            }
        }

        inner.set_state(ConnectionState::Reconnecting);
        let delay = backoff.next_delay();
        info!("Reconnecting to MQTT broker in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(&mut shutdown, &mut closing) => break,
        }
    }

    inner.set_state(ConnectionState::Disconnected);
    info!("MQTT connection task stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn table_keeps_registration_order() {
        let mut table = SubscriptionTable::default();
        let hits = Arc::new(Mutex::new(Vec::new()));

        for (pattern, tag) in [("a/+", 1), ("a/b", 2), ("a/+", 3), ("#", 4)] {
            let hits = hits.clone();
            table.insert(
                pattern,
                Arc::new(move |_: &str, _: &[u8]| hits.lock().unwrap().push(tag)),
            );
        }
        assert_eq!(table.patterns(), ["a/+", "a/b", "#"]);

        for handler in table.matching("a/b") {
            handler("a/b", b"");
        }
        assert_eq!(*hits.lock().unwrap(), [1, 3, 2, 4]);
    }

    #[test]
    fn publish_before_connect_drops() {
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(super::super::LoopbackBroker::new().transport()),
        )
        .unwrap();

        assert_eq!(client.publish("x/y", b"1".to_vec(), QoS::AtMostOnce, false), Delivery::Dropped);
        assert_eq!(client.publish("x/y", b"2".to_vec(), QoS::AtMostOnce, false), Delivery::Dropped);
        assert_eq!(client.stats().messages_dropped, 2);
        assert_eq!(client.stats().messages_sent, 0);
    }

    #[test]
    fn invalid_topic_keeps_outage_warning() {
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(super::super::LoopbackBroker::new().transport()),
        )
        .unwrap();

        assert_eq!(client.publish("x/+", b"1".to_vec(), QoS::AtMostOnce, false), Delivery::Dropped);
        assert_eq!(client.stats().messages_dropped, 1);
        assert!(!client.inner.drop_warned.load(Ordering::Relaxed));

        client.publish("x/y", b"2".to_vec(), QoS::AtMostOnce, false);
        assert!(client.inner.drop_warned.load(Ordering::Relaxed));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(super::super::LoopbackBroker::new().transport()),
        )
        .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = client.register_callback("a/#/b", move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert!(matches!(result, Err(MqttError::Config(_))));
    }

    #[test]
    fn connect_outside_runtime_is_config_error() {
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(super::super::LoopbackBroker::new().transport()),
        )
        .unwrap();
        let shutdown = Shutdown::new();
        assert!(matches!(client.connect_async(shutdown.signal()), Err(MqttError::Config(_))));
    }

    #[test]
    fn weak_handle_does_not_keep_client() {
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(super::super::LoopbackBroker::new().transport()),
        )
        .unwrap();
        let weak = client.downgrade();
        assert!(weak.upgrade().is_some());
        drop(client);
        assert!(weak.upgrade().is_none());
    }
}
