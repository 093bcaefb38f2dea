//! Light Listener
//!
//! Purely reactive: every raw reading that arrives on the configured topic
//! filter goes into a [`SampleWindow`], and the recomputed average is
//! republished, compared against the optional threshold and fed to the
//! optional actuator. All of it runs inside the broker callback, one message
//! at a time, so the window has a single writer.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use luxbridge_connectors::mqtt::topic;
use luxbridge_connectors::{BrokerClient, MqttError, QoS, ShutdownSignal, WeakBrokerClient};
use luxbridge_core::{
    Actuator, Latch, MonotonicTime, ReadingPayload, SampleWindow, ThresholdEvent, TimeSource,
    Trigger, WindowSpec,
};

use crate::config::LightCalculatorSection;
use crate::error::AgentError;

/// Source id on republished averages
pub const AVERAGE_SOURCE: &str = "average";

/// What to listen to and where results go
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSettings {
    /// Raw reading topic filter
    pub topic: String,
    /// Averaging window
    pub window: WindowSpec,
    /// Republish every average here
    pub average_topic: Option<String>,
    /// Publish threshold crossings here
    pub event_topic: Option<String>,
    /// Threshold on the average
    pub trigger: Option<Trigger>,
}

impl ListenerSettings {
    /// Settings from a `[LightCalculator]` section
    pub fn from_section(section: &LightCalculatorSection) -> Result<Self, AgentError> {
        Ok(Self {
            topic: section.topic.clone(),
            window: section.window_spec()?,
            average_topic: section.average_topic.clone().filter(|t| !t.is_empty()),
            event_topic: section.event_topic.clone(),
            trigger: section.trigger()?,
        })
    }

    /// Output topic the reading filter would subscribe to, if any
    ///
    /// Averages or events landing back in the window would feed on
    /// themselves, one publish per message received.
    pub fn feedback_key(&self) -> Option<&'static str> {
        feedback_key(&self.topic, self.average_topic.as_deref(), self.event_topic.as_deref())
    }
}

pub(crate) fn feedback_key(
    filter: &str,
    average_topic: Option<&str>,
    event_topic: Option<&str>,
) -> Option<&'static str> {
    [("average_topic", average_topic), ("event_topic", event_topic)]
        .into_iter()
        .find_map(|(key, name)| name.filter(|name| topic::matches(filter, name)).map(|_| key))
}

/// Listener counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListenerStats {
    /// Readings accepted into the window
    pub received: u64,
    /// Payloads that failed to decode
    pub rejected: u64,
    /// Threshold crossings
    pub events: u64,
    /// Readings evicted from the window
    pub evicted: u64,
    /// Readings currently in the window
    pub window_len: usize,
    /// Current average
    pub average: Option<f32>,
}

struct State {
    window: SampleWindow,
    latch: Option<Latch>,
    actuator: Option<Actuator>,
    received: u64,
    rejected: u64,
    events: u64,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Rolling-average consumer of raw readings
pub struct LightListener {
    broker: BrokerClient,
    settings: Arc<ListenerSettings>,
    state: Arc<Mutex<State>>,
    clock: Arc<dyn TimeSource>,
}

impl LightListener {
    /// Listener on `broker`, nothing subscribed until [`LightListener::subscribe`]
    ///
    /// Fails on an unusable window, or when `topic` matches one of the
    /// output topics.
    pub fn new(broker: BrokerClient, settings: ListenerSettings) -> Result<Self, AgentError> {
        if let Some(key) = settings.feedback_key() {
            return Err(AgentError::invalid(
                LightCalculatorSection::NAME,
                key,
                format!("is matched by the reading filter {:?}", settings.topic),
            ));
        }
        let window = SampleWindow::new(settings.window)
            .map_err(|e| AgentError::invalid(LightCalculatorSection::NAME, "window_size", e))?;
        let state = State {
            window,
            latch: settings.trigger.map(Latch::new),
            actuator: None,
            received: 0,
            rejected: 0,
            events: 0,
        };
        Ok(Self {
            broker,
            settings: Arc::new(settings),
            state: Arc::new(Mutex::new(state)),
            clock: Arc::new(MonotonicTime::new()),
        })
    }

    /// Drive `actuator` from the average
    pub fn with_actuator(self, actuator: Actuator) -> Self {
        lock(&self.state).actuator = Some(actuator);
        self
    }

    /// Stamp readings from `clock` on receipt
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Settings in use
    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    /// Register the reading callback
    pub fn subscribe(&self) -> Result<(), MqttError> {
        let handler = Handler {
            broker: self.broker.downgrade(),
            settings: self.settings.clone(),
            state: self.state.clone(),
            clock: self.clock.clone(),
        };
        self.broker.register_callback(&self.settings.topic, move |topic, payload| {
            handler.on_message(topic, payload)
        })
    }

    /// Current average, `None` while the window is empty
    pub fn average(&self) -> Option<f32> {
        lock(&self.state).window.average()
    }

    /// Counter snapshot
    pub fn stats(&self) -> ListenerStats {
        let state = lock(&self.state);
        ListenerStats {
            received: state.received,
            rejected: state.rejected,
            events: state.events,
            evicted: state.window.evicted(),
            window_len: state.window.len(),
            average: state.window.average(),
        }
    }

    /// Subscribe, then park until `shutdown`
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<ListenerStats, MqttError> {
        self.subscribe()?;
        info!(
            "Averaging {} over {:?}",
            self.settings.topic, self.settings.window
        );

        shutdown.cancelled().await;

        if let Some(actuator) = lock(&self.state).actuator.as_mut() {
            if let Err(fault) = actuator.release() {
                error!("Failed to release actuator pin {}: {fault}", actuator.pin());
            }
        }
        let stats = self.stats();
        info!(
            "Light listener stopped: {} readings, {} rejected, {} events, \
             average {:?} over {} samples",
            stats.received, stats.rejected, stats.events, stats.average, stats.window_len
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for LightListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightListener")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Callback half, shared with the broker's dispatch table
struct Handler {
    broker: WeakBrokerClient,
    settings: Arc<ListenerSettings>,
    state: Arc<Mutex<State>>,
    clock: Arc<dyn TimeSource>,
}

impl Handler {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        let payload = match ReadingPayload::decode(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Ignoring reading on {topic}: {e}");
                lock(&self.state).rejected += 1;
                return;
            }
        };
        let now = self.clock.now();
        let reading = payload.into_reading(topic, now);

        // Publish after the lock is released
        let mut outgoing = Vec::new();
        {
            let mut state = lock(&self.state);
            state.window.push(reading);
            state.received += 1;
            let Some(average) = state.window.average() else {
                return;
            };
            debug!("Average {average} over {} readings", state.window.len());

            if let Some(average_topic) = &self.settings.average_topic {
                let message = ReadingPayload {
                    value: average,
                    timestamp: Some(now),
                    source: Some(AVERAGE_SOURCE.into()),
                };
                outgoing.push((average_topic.as_str(), message.encode(), QoS::AtMostOnce));
            }

            let crossing = state.latch.as_mut().and_then(|latch| {
                let edge = latch.update(average)?;
                Some(ThresholdEvent::new(edge, average, latch.trigger().reference(average), now))
            });
            if let Some(event) = crossing {
                state.events += 1;
                info!("Average {average} crossed {}, switching {:?}", event.threshold, event.state);
                if let Some(event_topic) = &self.settings.event_topic {
                    outgoing.push((event_topic.as_str(), event.encode(), QoS::AtLeastOnce));
                }
            }

            if let Some(actuator) = state.actuator.as_mut() {
                if let Err(fault) = actuator.update(average) {
                    error!("Actuator pin {} fault: {fault}", actuator.pin());
                }
            }
        }

        if outgoing.is_empty() {
            return;
        }
        let Some(broker) = self.broker.upgrade() else {
            return;
        };
        for (topic, payload, qos) in outgoing {
            broker.publish(topic, payload, qos, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luxbridge_connectors::mqtt::LoopbackBroker;
    use luxbridge_connectors::MqttConfig;
    use luxbridge_core::MockTimeSource;

    fn listener(settings: ListenerSettings) -> (LightListener, Handler) {
        let broker = LoopbackBroker::new();
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(broker.transport()),
        )
        .unwrap();
        let listener = LightListener::new(client, settings)
            .unwrap()
            .with_clock(Arc::new(MockTimeSource::new(7)));
        let handler = Handler {
            broker: listener.broker.downgrade(),
            settings: listener.settings.clone(),
            state: listener.state.clone(),
            clock: listener.clock.clone(),
        };
        (listener, handler)
    }

    fn settings(size: usize) -> ListenerSettings {
        ListenerSettings {
            topic: "sensors/+/light".into(),
            window: WindowSpec::Count { size },
            average_topic: None,
            event_topic: None,
            trigger: None,
        }
    }

    #[test]
    fn window_scenario() {
        let (listener, handler) = listener(settings(3));
        assert_eq!(listener.average(), None);

        let mut averages = Vec::new();
        for value in ["10", "20", "30", "40"] {
            handler.on_message("sensors/1/light", value.as_bytes());
            averages.push(listener.average().unwrap());
        }
        assert_eq!(averages, [10.0, 15.0, 20.0, 30.0]);

        let stats = listener.stats();
        assert_eq!((stats.received, stats.evicted, stats.window_len), (4, 1, 3));
    }

    #[test]
    fn bad_payloads_are_counted_and_ignored() {
        let (listener, handler) = listener(settings(3));
        handler.on_message("sensors/1/light", b"dark");
        handler.on_message("sensors/1/light", br#"{"value":5.0,"source":"ldr"}"#);

        let stats = listener.stats();
        assert_eq!((stats.received, stats.rejected), (1, 1));
        assert_eq!(stats.average, Some(5.0));
    }

    #[test]
    fn threshold_counts_crossings() {
        let mut config = settings(1);
        config.trigger = Some(Trigger::above(100.0, 10.0).unwrap());
        let (listener, handler) = listener(config);

        for value in ["50", "100", "95", "102", "89", "100"] {
            handler.on_message("sensors/1/light", value.as_bytes());
        }
        // on at 100, off at 89, on at 100
        assert_eq!(listener.stats().events, 3);
    }

    #[test]
    fn zero_window_rejected() {
        let broker = LoopbackBroker::new();
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(broker.transport()),
        )
        .unwrap();
        assert!(LightListener::new(client, settings(0)).is_err());
    }

    #[test]
    fn own_output_topics_are_not_readings() {
        let mut config = settings(3);
        config.topic = "sensornetwork/#".into();
        config.average_topic = Some("sensornetwork/ldr/average".into());
        assert_eq!(config.feedback_key(), Some("average_topic"));

        config.average_topic = Some("lights/average".into());
        config.event_topic = Some("sensornetwork/ldr/event".into());
        assert_eq!(config.feedback_key(), Some("event_topic"));

        let broker = LoopbackBroker::new();
        let client = BrokerClient::with_transport(
            MqttConfig::new("loopback", 1883, "t"),
            Arc::new(broker.transport()),
        )
        .unwrap();
        assert!(matches!(
            LightListener::new(client, config).unwrap_err(),
            AgentError::Invalid { key: "event_topic", .. }
        ));

        let mut config = settings(3);
        config.average_topic = Some("sensors/average".into());
        assert_eq!(config.feedback_key(), None);
    }
}
