//! Agent configuration
//!
//! One file, INI or TOML by extension, with up to three sections. A section
//! that is absent disables its component:
//!
//! ```ini
//! [MQTT]
//! host = broker.local
//! username = sensor
//! password = secret
//!
//! [LDR]
//! device = /dev/ttyUSB0
//! poll_interval = 1s
//! actuator_pin = 18
//! on_below = 200
//! hysteresis = 25
//!
//! [LightCalculator]
//! topic = sensornetwork/+/light
//! window_size = 10
//! threshold_below = 150
//! event_topic = sensornetwork/ldr/dark
//! ```
//!
//! Every key can be overridden from the environment as
//! `LUXBRIDGE__<SECTION>__<KEY>`, e.g. `LUXBRIDGE__MQTT__PASSWORD`. Section
//! names match case-insensitively. Durations are humantime strings (`500ms`,
//! `1s`, `2m`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat, Map, Value, ValueKind};
use log::warn;
use luxbridge_connectors::mqtt::{topic, MqttConfig};
use luxbridge_connectors::SerialConfig;
use luxbridge_core::constants::{
    DEFAULT_AVERAGE_TOPIC, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS, DEFAULT_HYSTERESIS,
    DEFAULT_KEEPALIVE_S, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_READING_TOPIC, DEFAULT_SERIAL_TIMEOUT_MS, DEFAULT_SOURCE_ID, DEFAULT_STATUS_TOPIC,
    DEFAULT_WINDOW_SIZE,
};
use luxbridge_core::{ActuatorThreshold, Trigger, WindowSpec};
use serde::Deserialize;

use crate::error::AgentError;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LUXBRIDGE";

fn default_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "luxbridge".into()
}
fn default_keepalive() -> Duration {
    Duration::from_secs(DEFAULT_KEEPALIVE_S)
}
fn default_backoff_base() -> Duration {
    Duration::from_millis(DEFAULT_BACKOFF_BASE_MS)
}
fn default_backoff_cap() -> Duration {
    Duration::from_millis(DEFAULT_BACKOFF_CAP_MS)
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}
fn default_read_timeout() -> Duration {
    Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS)
}
fn default_reading_topic() -> String {
    DEFAULT_READING_TOPIC.into()
}
fn default_status_topic() -> String {
    DEFAULT_STATUS_TOPIC.into()
}
fn default_source_id() -> String {
    DEFAULT_SOURCE_ID.into()
}
fn default_max_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}
fn default_average_topic() -> Option<String> {
    Some(DEFAULT_AVERAGE_TOPIC.into())
}

/// `[MQTT]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSection {
    /// Broker host, required
    pub host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// MQTT client id
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// User name
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// Keepalive interval
    #[serde(default = "default_keepalive", with = "humantime_serde")]
    pub keepalive: Duration,
    /// First reconnect delay
    #[serde(default = "default_backoff_base", with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Longest reconnect delay
    #[serde(default = "default_backoff_cap", with = "humantime_serde")]
    pub backoff_cap: Duration,
    /// Retained online/offline topic
    #[serde(default)]
    pub status_topic: Option<String>,
}

impl MqttSection {
    /// Broker client settings
    pub fn to_mqtt_config(&self) -> Result<MqttConfig, AgentError> {
        let mut config = MqttConfig::new(&self.host, self.port, &self.client_id)
            .keepalive(self.keepalive)
            .backoff(self.backoff_base, self.backoff_cap);
        config.username = self.username.clone();
        config.password = self.password.clone();
        config.status_topic = self.status_topic.clone();
        config.validate()?;
        Ok(config)
    }
}

/// `[LDR]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LdrSection {
    /// Serial device, required
    pub device: String,
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Time between reads
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Longest wait for one line
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Reading topic
    #[serde(default = "default_reading_topic")]
    pub topic: String,
    /// Status event topic
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Source id stamped on readings
    #[serde(default = "default_source_id")]
    pub source_id: String,
    /// Failed reads in a row before the sensor is reported lost
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    /// Divide raw values by this
    #[serde(default)]
    pub full_scale: Option<f32>,
    /// Written to the device before each read
    #[serde(default)]
    pub request: Option<String>,
    /// Pin driven from the raw value
    #[serde(default)]
    pub actuator_pin: Option<u8>,
    /// Switch on at or below
    #[serde(default)]
    pub on_below: Option<f32>,
    /// Switch on at or above
    #[serde(default)]
    pub on_above: Option<f32>,
    /// Hysteresis band
    #[serde(default)]
    pub hysteresis: Option<f32>,
    /// Drive the pin low when on
    #[serde(default)]
    pub active_low: bool,
}

impl LdrSection {
    const NAME: &'static str = "LDR";

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.device.trim().is_empty() {
            return Err(AgentError::invalid(Self::NAME, "device", "must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(AgentError::invalid(Self::NAME, "poll_interval", "must be positive"));
        }
        if self.read_timeout.is_zero() {
            return Err(AgentError::invalid(Self::NAME, "read_timeout", "must be positive"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(AgentError::invalid(
                Self::NAME,
                "max_consecutive_failures",
                "must be at least 1",
            ));
        }
        if let Some(full_scale) = self.full_scale {
            if !full_scale.is_finite() || full_scale <= 0.0 {
                return Err(AgentError::invalid(
                    Self::NAME,
                    "full_scale",
                    "must be a positive number",
                ));
            }
        }
        topic::validate_topic(&self.topic)
            .map_err(|e| AgentError::invalid(Self::NAME, "topic", e))?;
        topic::validate_topic(&self.status_topic)
            .map_err(|e| AgentError::invalid(Self::NAME, "status_topic", e))?;
        self.actuator_threshold().map(|_| ())
    }

    /// Serial link settings
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            device: self.device.clone(),
            baud_rate: self.baud_rate,
            read_timeout: self.read_timeout,
            request: self.request.clone(),
            full_scale: self.full_scale,
        }
    }

    /// Actuator settings, `None` without `actuator_pin`
    pub fn actuator_threshold(&self) -> Result<Option<ActuatorThreshold>, AgentError> {
        let Some(pin) = self.actuator_pin else {
            if self.on_below.is_some() || self.on_above.is_some() {
                warn!("[LDR] thresholds set without actuator_pin, ignoring them");
            }
            return Ok(None);
        };
        ActuatorThreshold::new(pin, self.on_below, self.on_above, self.hysteresis)
            .map(|t| Some(t.active_low(self.active_low)))
            .map_err(|e| AgentError::invalid(Self::NAME, "on_below/on_above", e))
    }
}

/// `[LightCalculator]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LightCalculatorSection {
    /// Raw reading topic filter, wildcards allowed
    #[serde(default = "default_reading_topic")]
    pub topic: String,
    /// Count window size
    #[serde(default)]
    pub window_size: Option<usize>,
    /// Time window span, exclusive with `window_size`
    #[serde(default, with = "humantime_serde")]
    pub window_duration: Option<Duration>,
    /// Where every recomputed average is republished
    #[serde(default = "default_average_topic")]
    pub average_topic: Option<String>,
    /// Where threshold crossings are published
    #[serde(default)]
    pub event_topic: Option<String>,
    /// Fire while the average is at or above
    #[serde(default)]
    pub threshold_above: Option<f32>,
    /// Fire while the average is at or below
    #[serde(default)]
    pub threshold_below: Option<f32>,
    /// Hysteresis band
    #[serde(default)]
    pub hysteresis: Option<f32>,
    /// Pin driven from the average
    #[serde(default)]
    pub actuator_pin: Option<u8>,
    /// Drive the pin low when on
    #[serde(default)]
    pub active_low: bool,
}

impl LightCalculatorSection {
    pub(crate) const NAME: &'static str = "LightCalculator";

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), AgentError> {
        topic::validate_filter(&self.topic)
            .map_err(|e| AgentError::invalid(Self::NAME, "topic", e))?;
        let outputs = [("average_topic", &self.average_topic), ("event_topic", &self.event_topic)];
        for (key, value) in outputs {
            if let Some(name) = value {
                topic::validate_topic(name).map_err(|e| AgentError::invalid(Self::NAME, key, e))?;
            }
        }
        if let Some(key) = crate::listener::feedback_key(
            &self.topic,
            self.average_topic.as_deref().filter(|t| !t.is_empty()),
            self.event_topic.as_deref(),
        ) {
            return Err(AgentError::invalid(
                Self::NAME,
                key,
                format!("is matched by the reading filter {:?}", self.topic),
            ));
        }
        if self.event_topic.is_some() && self.trigger()?.is_none() {
            warn!("[LightCalculator] event_topic set without a threshold, no events will be sent");
        }
        self.window_spec()?;
        self.actuator_threshold().map(|_| ())
    }

    /// Count or time bound
    pub fn window_spec(&self) -> Result<WindowSpec, AgentError> {
        let spec = match (self.window_size, self.window_duration) {
            (Some(_), Some(_)) => {
                return Err(AgentError::invalid(
                    Self::NAME,
                    "window_duration",
                    "cannot be combined with window_size",
                ))
            }
            (None, Some(duration)) => WindowSpec::Time { duration_ms: duration.as_millis() as u64 },
            (size, None) => WindowSpec::Count { size: size.unwrap_or(DEFAULT_WINDOW_SIZE) },
        };
        // Surface zero or oversized windows as configuration errors
        luxbridge_core::SampleWindow::new(spec)
            .map_err(|e| AgentError::invalid(Self::NAME, "window_size", e))?;
        Ok(spec)
    }

    /// Threshold on the average, if any
    pub fn trigger(&self) -> Result<Option<Trigger>, AgentError> {
        if self.threshold_above.is_none() && self.threshold_below.is_none() {
            return Ok(None);
        }
        Trigger::new(
            self.threshold_below,
            self.threshold_above,
            self.hysteresis.unwrap_or(DEFAULT_HYSTERESIS),
        )
        .map(Some)
        .map_err(|e| AgentError::invalid(Self::NAME, "threshold_above/threshold_below", e))
    }

    /// Actuator settings, `None` without `actuator_pin`
    pub fn actuator_threshold(&self) -> Result<Option<ActuatorThreshold>, AgentError> {
        let Some(pin) = self.actuator_pin else {
            return Ok(None);
        };
        if self.trigger()?.is_none() {
            return Err(AgentError::invalid(
                Self::NAME,
                "actuator_pin",
                "needs threshold_above or threshold_below",
            ));
        }
        ActuatorThreshold::new(pin, self.threshold_below, self.threshold_above, self.hysteresis)
            .map(|t| Some(t.active_low(self.active_low)))
            .map_err(|e| AgentError::invalid(Self::NAME, "actuator_pin", e))
    }
}

/// Whole agent configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentConfig {
    /// Broker client, if configured
    pub mqtt: Option<MqttSection>,
    /// Sensor bridge, if configured
    pub ldr: Option<LdrSection>,
    /// Light listener, if configured
    pub light_calculator: Option<LightCalculatorSection>,
}

impl AgentConfig {
    /// Load `path`, overlaid with `LUXBRIDGE__` environment variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Self::from_config(settings)
    }

    /// Parse configuration text directly
    pub fn from_text(text: &str, format: FileFormat) -> Result<Self, AgentError> {
        let settings = Config::builder().add_source(File::from_str(text, format)).build()?;
        Self::from_config(settings)
    }

    fn from_config(settings: Config) -> Result<Self, AgentError> {
        let sections: HashMap<String, Value> = settings.try_deserialize()?;

        let config = Self {
            mqtt: section(&sections, "MQTT")?,
            ldr: section(&sections, "LDR")?,
            light_calculator: section(&sections, "LightCalculator")?,
        };
        if let Some(ldr) = &config.ldr {
            ldr.validate()?;
        }
        if let Some(light) = &config.light_calculator {
            light.validate()?;
        }
        if let Some(mqtt) = &config.mqtt {
            mqtt.to_mqtt_config()?;
        }
        Ok(config)
    }

    /// Names of configured sections, for the startup log
    pub fn sections(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.mqtt.is_some() {
            names.push("MQTT");
        }
        if self.ldr.is_some() {
            names.push("LDR");
        }
        if self.light_calculator.is_some() {
            names.push("LightCalculator");
        }
        names
    }
}

/// `LightCalculator`, `lightcalculator` and `light_calculator` all match
fn normalize(name: &str) -> String {
    name.chars().filter(|c| *c != '_').flat_map(char::to_lowercase).collect()
}

fn section<T>(
    sections: &HashMap<String, Value>,
    name: &'static str,
) -> Result<Option<T>, AgentError>
where
    T: for<'de> Deserialize<'de>,
{
    let wanted = normalize(name);
    let mut keys: Vec<&String> = sections.keys().filter(|key| normalize(key) == wanted).collect();
    if keys.is_empty() {
        return Ok(None);
    }
    // `[MQTT]` from the file and `mqtt` from the environment may both be
    // present; sorted, the lowercase spelling is merged last
    keys.sort();
    let mut merged = Map::new();
    for key in keys {
        let table = sections[key]
            .clone()
            .into_table()
            .map_err(|e| AgentError::invalid(name, "(section)", e))?;
        merged.extend(table);
    }
    Value::new(None, ValueKind::Table(merged))
        .try_deserialize()
        .map(Some)
        .map_err(|e| AgentError::invalid(name, "(section)", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything_optional() {
        let config = AgentConfig::from_text(
            "[MQTT]\nhost = localhost\n\n[LDR]\ndevice = /dev/ttyACM0\n",
            FileFormat::Ini,
        )
        .unwrap();

        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.keepalive, Duration::from_secs(60));

        let ldr = config.ldr.unwrap();
        assert_eq!(ldr.baud_rate, 9600);
        assert_eq!(ldr.poll_interval, Duration::from_secs(1));
        assert_eq!(ldr.topic, DEFAULT_READING_TOPIC);
        assert_eq!(ldr.actuator_threshold().unwrap(), None);
        assert!(config.light_calculator.is_none());
    }

    #[test]
    fn section_names_ignore_case() {
        let config = AgentConfig::from_text(
            "[lightcalculator]\nwindow_duration = 30s\nthreshold_above = 700\nhysteresis = 50\n",
            FileFormat::Ini,
        )
        .unwrap();
        let light = config.light_calculator.unwrap();
        assert_eq!(light.window_spec().unwrap(), WindowSpec::Time { duration_ms: 30_000 });
        assert_eq!(light.trigger().unwrap().unwrap().on_above(), Some(700.0));
        assert_eq!(light.average_topic.as_deref(), Some(DEFAULT_AVERAGE_TOPIC));
    }

    #[test]
    fn toml_works_too() {
        let config = AgentConfig::from_text(
            "[MQTT]\nhost = \"broker\"\nport = 8883\nbackoff_cap = \"30s\"\n",
            FileFormat::Toml,
        )
        .unwrap();
        let mqtt = config.mqtt.unwrap().to_mqtt_config().unwrap();
        assert_eq!(mqtt.port, 8883);
        assert_eq!(mqtt.backoff_cap, Duration::from_secs(30));
    }

    #[test]
    fn errors_name_section_and_key() {
        let err = AgentConfig::from_text(
            "[LDR]\ndevice = /dev/ttyUSB0\nactuator_pin = 18\non_below = 300\non_above = 100\n",
            FileFormat::Ini,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("[LDR]"), "{message}");
        assert!(message.contains("on_below"), "{message}");

        let err = AgentConfig::from_text(
            "[LightCalculator]\nwindow_size = 5\nwindow_duration = 5s\n",
            FileFormat::Ini,
        )
        .unwrap_err();
        assert!(err.to_string().contains("window_duration"));

        let err = AgentConfig::from_text("[LightCalculator]\nactuator_pin = 4\n", FileFormat::Ini)
            .unwrap_err();
        assert!(err.to_string().contains("actuator_pin"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err =
            AgentConfig::from_text("[MQTT]\nhost = h\nprot = 1\n", FileFormat::Ini).unwrap_err();
        assert!(matches!(err, AgentError::Invalid { section: "MQTT", .. }));
    }
}
