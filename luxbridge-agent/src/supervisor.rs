//! Supervisor
//!
//! Builds the components whose sections are present, owns their task
//! handles and the one shutdown signal they all listen to.
//!
//! ```text
//!  AgentConfig ──▶ build ──▶ spawn ──▶ wait ──────────────▶ stop
//!                  pins      bridge    stop signal          trigger shutdown
//!                  broker    listener  broker Fatal         join with grace
//!                  actuators broker    heartbeat (debug)    close broker
//! ```
//!
//! Everything fallible (pin claims, actuator setup, broker config) happens
//! before the first task is spawned.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use luxbridge_connectors::mqtt::Transport;
use luxbridge_connectors::{
    BrokerClient, ConnectionStats, LightSource, MqttError, SerialLightSource, Shutdown,
    ShutdownSignal,
};
use luxbridge_core::constants::{HEARTBEAT_INTERVAL_MS, SHUTDOWN_GRACE_MS};
use luxbridge_core::gpio::DEFAULT_SYSFS_GPIO;
use luxbridge_core::{
    Actuator, ActuatorThreshold, GpioPort, MemoryGpio, PinClaims, SysfsGpio, TimeSource,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bridge::{BridgeSettings, BridgeStats, SensorBridge};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::listener::{LightListener, ListenerSettings, ListenerStats};

/// What each component reported on the way out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Bridge counters, if the bridge ran and stopped in time
    pub bridge: Option<BridgeStats>,
    /// Listener counters, if the listener ran and stopped in time
    pub listener: Option<ListenerStats>,
    /// Broker counters, if a broker was configured
    pub broker: Option<ConnectionStats>,
}

/// Process-level owner of every component
pub struct Supervisor {
    config: AgentConfig,
    trace_topics: Vec<String>,
    transport: Option<Arc<dyn Transport>>,
    gpio: Option<Arc<dyn GpioPort>>,
    source: Option<Box<dyn LightSource>>,
    clock: Option<Arc<dyn TimeSource>>,
    grace: Duration,
}

struct Running {
    shutdown: Shutdown,
    broker: Option<BrokerClient>,
    broker_stop: Shutdown,
    broker_task: Option<JoinHandle<Result<(), MqttError>>>,
    bridge_task: Option<JoinHandle<BridgeStats>>,
    listener_task: Option<JoinHandle<Result<ListenerStats, MqttError>>>,
}

impl Supervisor {
    /// Supervisor for `config`
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            trace_topics: Vec::new(),
            transport: None,
            gpio: None,
            source: None,
            clock: None,
            grace: Duration::from_millis(SHUTDOWN_GRACE_MS),
        }
    }

    /// Log every message on these patterns at debug level
    pub fn trace_topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.trace_topics.extend(topics);
        self
    }

    /// Talk to the broker through `transport` instead of rumqttc
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Drive actuators through `gpio` instead of probing the host
    pub fn with_gpio(mut self, gpio: Arc<dyn GpioPort>) -> Self {
        self.gpio = Some(gpio);
        self
    }

    /// Read the LDR from `source` instead of the configured serial device
    pub fn with_light_source(mut self, source: impl LightSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Timestamp readings from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// How long tasks get to stop once shutdown fires
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run until `stop` fires or the broker rejects our credentials
    pub async fn run(self, mut stop: ShutdownSignal) -> Result<RunSummary, AgentError> {
        let grace = self.grace;
        let mut running = self.start()?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
        heartbeat.tick().await;

        let fatal = loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("Shutting down");
                    break None;
                }
                exit = broker_exit(&mut running.broker_task) => {
                    running.broker_task = None;
                    match exit {
                        Some(Err(e)) if e.is_fatal() => {
                            error!("Broker connection failed for good: {e}");
                            break Some(e);
                        }
                        Some(Err(e)) => warn!("Broker connection task ended: {e}"),
                        Some(Ok(())) | None => warn!("Broker connection task ended"),
                    }
                }
                _ = heartbeat.tick() => {
                    let broker = running.broker.as_ref().map(BrokerClient::state);
                    debug!("Alive, broker {broker:?}");
                }
            }
        };

        let summary = running.stop(grace).await;
        match fatal {
            Some(e) => Err(AgentError::Broker(e)),
            None => Ok(summary),
        }
    }

    fn start(mut self) -> Result<Running, AgentError> {
        info!(
            "luxbridge {} on {}, sections: {:?}",
            crate::VERSION,
            std::env::consts::ARCH,
            self.config.sections()
        );
        let mut claims = PinClaims::new();

        let broker = match &self.config.mqtt {
            Some(section) => {
                let config = section.to_mqtt_config()?;
                let client = match self.transport.clone() {
                    Some(transport) => BrokerClient::with_transport(config, transport)?,
                    None => BrokerClient::new(config)?,
                };
                Some(client)
            }
            None => {
                info!("No [MQTT] section, running without a broker");
                None
            }
        };

        if let Some(client) = &broker {
            for pattern in &self.trace_topics {
                client.register_callback(pattern, |topic, payload| {
                    debug!("[trace] {topic}: {}", String::from_utf8_lossy(payload));
                })?;
            }
        } else if !self.trace_topics.is_empty() {
            warn!("Trace topics ignored without an [MQTT] section");
        }

        let listener = match (self.config.light_calculator.clone(), &broker) {
            (Some(_), None) => {
                error!("[LightCalculator] needs an [MQTT] section, light listener disabled");
                None
            }
            (Some(section), Some(client)) => {
                let settings = ListenerSettings::from_section(&section)?;
                let mut listener = LightListener::new(client.clone(), settings)?;
                if let Some(threshold) = section.actuator_threshold()? {
                    let actuator = self.actuator(&mut claims, "LightCalculator", threshold)?;
                    listener = listener.with_actuator(actuator);
                }
                if let Some(clock) = &self.clock {
                    listener = listener.with_clock(clock.clone());
                }
                info!("Light listener enabled on {}", section.topic);
                Some(listener)
            }
            (None, _) => None,
        };

        let bridge = match self.config.ldr.clone() {
            Some(section) => {
                let source: Box<dyn LightSource> = match self.source.take() {
                    Some(source) => source,
                    None => Box::new(SerialLightSource::new(section.serial_config())),
                };
                let mut bridge = SensorBridge::new(source, BridgeSettings::from(&section));
                if let Some(client) = &broker {
                    bridge = bridge.with_broker(client.clone());
                }
                if let Some(threshold) = section.actuator_threshold()? {
                    bridge = bridge.with_actuator(self.actuator(&mut claims, "LDR", threshold)?);
                }
                if let Some(clock) = &self.clock {
                    bridge = bridge.with_clock(clock.clone());
                }
                info!("Sensor bridge enabled on {}", section.device);
                Some(bridge)
            }
            None => None,
        };

        if broker.is_none() && bridge.is_none() {
            warn!("Nothing configured, idling until stopped");
        }

        let shutdown = Shutdown::new();
        let broker_stop = Shutdown::new();
        let listener_task = listener.map(|listener| tokio::spawn(listener.run(shutdown.signal())));
        let bridge_task = bridge.map(|bridge| bridge.run_async(shutdown.signal()));
        let broker_task = match &broker {
            Some(client) => Some(client.connect_async(broker_stop.signal())?),
            None => None,
        };

        Ok(Running { shutdown, broker, broker_stop, broker_task, bridge_task, listener_task })
    }

    fn actuator(
        &mut self,
        claims: &mut PinClaims,
        owner: &str,
        threshold: ActuatorThreshold,
    ) -> Result<Actuator, AgentError> {
        claims.claim(threshold.pin(), owner)?;
        let actuator = Actuator::new(self.gpio_port(), threshold)?;
        info!("[{owner}] drives GPIO pin {}", threshold.pin());
        Ok(actuator)
    }

    fn gpio_port(&mut self) -> Arc<dyn GpioPort> {
        if let Some(gpio) = &self.gpio {
            return gpio.clone();
        }
        let gpio: Arc<dyn GpioPort> = if SysfsGpio::available(DEFAULT_SYSFS_GPIO) {
            info!("Using sysfs GPIO at {DEFAULT_SYSFS_GPIO}");
            Arc::new(SysfsGpio::new())
        } else {
            warn!(
                "No GPIO interface at {DEFAULT_SYSFS_GPIO}, probably not running on the \
                 Raspberry Pi. Pins are simulated in memory."
            );
            Arc::new(MemoryGpio::new())
        };
        self.gpio = Some(gpio.clone());
        gpio
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("sections", &self.config.sections())
            .field("trace_topics", &self.trace_topics)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl Running {
    async fn stop(self, grace: Duration) -> RunSummary {
        self.shutdown.trigger();
        let deadline = Instant::now() + grace;

        let bridge = match self.bridge_task {
            Some(task) => join_within(deadline, "sensor bridge", task).await,
            None => None,
        };
        let listener = match self.listener_task {
            Some(task) => match join_within(deadline, "light listener", task).await {
                Some(Ok(stats)) => Some(stats),
                Some(Err(e)) => {
                    error!("Light listener failed: {e}");
                    None
                }
                None => None,
            },
            None => None,
        };

        let broker = self.broker.map(|client| {
            client.close();
            client
        });
        if let Some(task) = self.broker_task {
            // Fatal errors were already handled by the select loop
            if let Some(Err(e)) = join_within(deadline, "broker connection", task).await {
                debug!("Broker connection ended with {e}");
            }
        }
        drop(self.broker_stop);

        let broker = broker.map(|client| client.stats());
        info!("Stopped");
        RunSummary { bridge, listener, broker }
    }
}

/// Resolves when the broker task ends, never when there is none
async fn broker_exit(
    task: &mut Option<JoinHandle<Result<(), MqttError>>>,
) -> Option<Result<(), MqttError>> {
    match task {
        Some(handle) => match handle.await {
            Ok(result) => Some(result),
            Err(join) => {
                error!("Broker connection task panicked: {join}");
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn join_within<T>(deadline: Instant, name: &str, task: JoinHandle<T>) -> Option<T> {
    let abort = task.abort_handle();
    match tokio::time::timeout_at(deadline, task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(join)) => {
            error!("{name} task failed: {join}");
            None
        }
        Err(_) => {
            warn!("{name} did not stop in time, aborting it");
            abort.abort();
            None
        }
    }
}

/// Wait for Ctrl-C or, on unix, SIGTERM
pub async fn wait_for_signal() -> Result<&'static str, AgentError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT").map_err(AgentError::from),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl-C")
    }
}
