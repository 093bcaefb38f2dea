//! Sensor Bridge
//!
//! Polls a [`LightSource`] on a fixed interval, publishes every good reading
//! and optionally drives an actuator pin straight from the raw value.
//!
//! ```text
//!   tick ──▶ read_raw ──┬── Ok(v) ──▶ Reading ──▶ publish(topic)
//!                       │                    └──▶ actuator.update(v)
//!                       └── Err ──▶ failures += 1
//!                                   failures == max ──▶ StatusEvent(sensor_lost)
//! ```
//!
//! A failed read costs one cycle and nothing else. After
//! `max_consecutive_failures` misses in a row a warning [`StatusEvent`] goes
//! to the status topic, once per outage; the first good read afterwards
//! sends the matching recovery event.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use luxbridge_connectors::{BrokerClient, LightSource, QoS, ShutdownSignal};
use luxbridge_core::constants::{
    DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READING_TOPIC,
    DEFAULT_SOURCE_ID, DEFAULT_STATUS_TOPIC,
};
use luxbridge_core::{
    Actuator, MonotonicTime, Reading, SensorReadError, StatusEvent, TimeSource,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::LdrSection;

/// Polling and publishing settings
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    /// Reading topic
    pub topic: String,
    /// Status event topic
    pub status_topic: String,
    /// Source id stamped on readings
    pub source_id: String,
    /// Time between reads
    pub poll_interval: Duration,
    /// Misses in a row that count as a lost sensor, escalated on the last one
    pub max_consecutive_failures: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_READING_TOPIC.into(),
            status_topic: DEFAULT_STATUS_TOPIC.into(),
            source_id: DEFAULT_SOURCE_ID.into(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl From<&LdrSection> for BridgeSettings {
    fn from(section: &LdrSection) -> Self {
        Self {
            topic: section.topic.clone(),
            status_topic: section.status_topic.clone(),
            source_id: section.source_id.clone(),
            poll_interval: section.poll_interval,
            max_consecutive_failures: section.max_consecutive_failures,
        }
    }
}

/// Counters returned when the polling task ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Poll cycles run
    pub cycles: u64,
    /// Good reads
    pub readings: u64,
    /// Failed reads
    pub failed_reads: u64,
    /// Readings queued on the broker
    pub published: u64,
    /// Readings dropped because the broker was unavailable
    pub dropped: u64,
    /// Outages escalated to a status event
    pub escalations: u64,
    /// Actuator writes that failed
    pub gpio_faults: u64,
}

/// Periodic LDR reader
pub struct SensorBridge {
    source: Box<dyn LightSource>,
    settings: BridgeSettings,
    broker: Option<BrokerClient>,
    actuator: Option<Actuator>,
    clock: Arc<dyn TimeSource>,
    consecutive_failures: u32,
    escalated: bool,
    stats: BridgeStats,
}

impl SensorBridge {
    /// Bridge reading from `source`, no broker and no actuator yet
    pub fn new(source: impl LightSource + 'static, settings: BridgeSettings) -> Self {
        Self {
            source: Box::new(source),
            settings,
            broker: None,
            actuator: None,
            clock: Arc::new(MonotonicTime::new()),
            consecutive_failures: 0,
            escalated: false,
            stats: BridgeStats::default(),
        }
    }

    /// Publish readings and status events through `broker`
    pub fn with_broker(mut self, broker: BrokerClient) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Drive `actuator` from every raw value
    pub fn with_actuator(mut self, actuator: Actuator) -> Self {
        self.actuator = Some(actuator);
        self
    }

    /// Stamp readings from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Settings in use
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Counters so far
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Misses since the last good read
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Spawn the polling loop
    ///
    /// The first read happens at once, then every `poll_interval`. A slow
    /// read pushes later ticks back instead of bursting to catch up.
    pub fn run_async(mut self, mut shutdown: ShutdownSignal) -> JoinHandle<BridgeStats> {
        tokio::spawn(async move {
            info!(
                "Polling {} every {:?}, publishing on {}",
                self.source.describe(),
                self.settings.poll_interval,
                self.settings.topic
            );
            let mut ticker = tokio::time::interval(self.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = self.poll_once().await;
                    }
                }
            }

            if let Some(actuator) = self.actuator.as_mut() {
                if let Err(fault) = actuator.release() {
                    error!("Failed to release actuator pin {}: {fault}", actuator.pin());
                }
            }
            info!("Sensor bridge stopped: {:?}", self.stats);
            self.stats
        })
    }

    /// Run one cycle: read, publish, actuate
    pub async fn poll_once(&mut self) -> Result<Reading, SensorReadError> {
        self.stats.cycles += 1;
        match self.source.read_raw().await {
            Ok(value) => Ok(self.on_value(value)),
            Err(e) => {
                self.on_failure(&e);
                Err(e)
            }
        }
    }

    fn on_value(&mut self, value: f32) -> Reading {
        let now = self.clock.now();
        if self.escalated {
            info!(
                "Sensor recovered after {} failed reads",
                self.consecutive_failures
            );
            let event = StatusEvent::sensor_recovered(self.consecutive_failures, now);
            self.publish_status(event);
            self.escalated = false;
        }
        self.consecutive_failures = 0;
        self.stats.readings += 1;

        let reading = Reading::new(self.settings.source_id.as_str(), value, now);
        debug!("Read {value} from {}", self.settings.source_id);

        if let Some(broker) = &self.broker {
            let payload = reading.to_payload().encode();
            if broker.publish(&self.settings.topic, payload, QoS::AtMostOnce, false).is_queued() {
                self.stats.published += 1;
            } else {
                self.stats.dropped += 1;
            }
        }

        if let Some(actuator) = self.actuator.as_mut() {
            match actuator.update(value) {
                Ok(Some(edge)) => {
                    info!("Actuator pin {} switched {} at {value}", actuator.pin(), edge.as_str())
                }
                Ok(None) => {}
                Err(fault) => {
                    self.stats.gpio_faults += 1;
                    error!("Actuator pin {} fault: {fault}", actuator.pin());
                }
            }
        }
        reading
    }

    fn on_failure(&mut self, e: &SensorReadError) {
        self.stats.failed_reads += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.escalated {
            debug!("Sensor still unavailable ({} misses): {e}", self.consecutive_failures);
            return;
        }
        if self.consecutive_failures >= self.settings.max_consecutive_failures {
            error!(
                "Sensor lost after {} consecutive failed reads: {e}",
                self.consecutive_failures
            );
            self.escalated = true;
            self.stats.escalations += 1;
            let event = StatusEvent::sensor_lost(self.consecutive_failures, self.clock.now());
            self.publish_status(event);
        } else {
            warn!("Sensor read failed, skipping cycle: {e}");
        }
    }

    fn publish_status(&self, event: StatusEvent) {
        if let Some(broker) = &self.broker {
            broker.publish(&self.settings.status_topic, event.encode(), QoS::AtLeastOnce, false);
        }
    }
}

impl std::fmt::Debug for SensorBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorBridge")
            .field("source", &self.source.describe())
            .field("settings", &self.settings)
            .field("actuator", &self.actuator)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
