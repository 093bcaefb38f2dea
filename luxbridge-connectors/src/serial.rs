//! Microcontroller serial link
//!
//! The LDR hangs off an Arduino-class board that prints one reading per line
//! over USB serial. Firmware varies: some boards print a bare count (`512`),
//! some a label (`LDR: 512`), some only answer when poked with a request
//! string. [`SerialLightSource`] handles all three:
//!
//! ```text
//!  poll ──▶ [write request] ──▶ read_line (timeout) ──▶ last number ──▶ / full_scale
//! ```
//!
//! The port is opened lazily and reopened after any link error, so a board
//! that is unplugged and plugged back comes back without a restart.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use luxbridge_core::constants::DEFAULT_SERIAL_TIMEOUT_MS;
use luxbridge_core::SensorReadError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use crate::source::LightSource;

/// Serial link settings
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    /// Device node, e.g. `/dev/ttyUSB0`
    pub device: String,
    /// Line speed
    pub baud_rate: u32,
    /// Longest wait for one line
    pub read_timeout: Duration,
    /// Optional string written before each read
    pub request: Option<String>,
    /// Divide raw values by this to normalize (1023 for a 10-bit ADC)
    pub full_scale: Option<f32>,
}

impl SerialConfig {
    /// 9600 baud, default timeout, no request, no scaling
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: 9600,
            read_timeout: Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS),
            request: None,
            full_scale: None,
        }
    }
}

/// LDR behind a serial microcontroller
pub struct SerialLightSource {
    config: SerialConfig,
    port: Option<BufReader<SerialStream>>,
}

impl SerialLightSource {
    /// Port is opened on the first read
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    /// Settings in use
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn open(&self) -> Result<BufReader<SerialStream>, SensorReadError> {
        let stream = tokio_serial::new(&self.config.device, self.config.baud_rate)
            .timeout(self.config.read_timeout)
            .open_native_async()
            .map_err(|e| SensorReadError::Link {
                reason: format!("{}: {e}", self.config.device),
            })?;
        info!("Opened {} at {} baud", self.config.device, self.config.baud_rate);
        Ok(BufReader::new(stream))
    }
}

/// Write the request if any, then read one line
async fn exchange(
    port: &mut BufReader<SerialStream>,
    request: Option<&str>,
    timeout: Duration,
) -> Result<String, SensorReadError> {
    let link = |e: std::io::Error| SensorReadError::Link { reason: e.to_string() };

    if let Some(request) = request {
        // Discard answers to earlier requests that arrived late
        let stale = port.buffer().len();
        port.consume(stale);
        if let Err(e) = port.get_ref().clear(ClearBuffer::Input) {
            debug!("Could not clear serial input: {e}");
        }
        port.get_mut().write_all(request.as_bytes()).await.map_err(link)?;
        port.get_mut().flush().await.map_err(link)?;
    }

    let mut line = String::new();
    match tokio::time::timeout(timeout, port.read_line(&mut line)).await {
        Err(_) => Err(SensorReadError::Timeout { timeout_ms: timeout.as_millis() as u64 }),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
            Err(SensorReadError::Timeout { timeout_ms: timeout.as_millis() as u64 })
        }
        Ok(Err(e)) => Err(link(e)),
        Ok(Ok(0)) => Err(SensorReadError::Link { reason: "device closed".into() }),
        Ok(Ok(_)) => Ok(line),
    }
}

#[async_trait]
impl LightSource for SerialLightSource {
    async fn read_raw(&mut self) -> Result<f32, SensorReadError> {
        if self.port.is_none() {
            self.port = Some(self.open()?);
        }
        let port = self.port.as_mut().ok_or_else(|| SensorReadError::Link {
            reason: "serial port not open".into(),
        })?;

        let request = self.config.request.as_deref();
        let line = match exchange(port, request, self.config.read_timeout).await {
            Ok(line) => line,
            Err(err) => {
                if matches!(err, SensorReadError::Link { .. }) {
                    // Reopen on the next poll
                    self.port = None;
                }
                return Err(err);
            }
        };

        let raw = parse_light_line(&line)?;
        Ok(match self.config.full_scale {
            Some(full_scale) => raw / full_scale,
            None => raw,
        })
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.config.device, self.config.baud_rate)
    }
}

/// Extract the light value from one line of firmware output
///
/// Accepts a bare number or takes the last number on the line.
pub fn parse_light_line(line: &str) -> Result<f32, SensorReadError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(SensorReadError::Empty);
    }

    let value = line.parse::<f32>().ok().or_else(|| {
        line.split(|c: char| c.is_whitespace() || matches!(c, ':' | '=' | ',' | ';'))
            .rev()
            .find_map(|token| token.parse::<f32>().ok())
    });

    match value {
        Some(value) if value.is_finite() => Ok(value),
        _ => Err(SensorReadError::Malformed { line: line.to_string() }),
    }
}
