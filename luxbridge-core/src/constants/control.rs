//! Control Loop Defaults
//!
//! Threshold and escalation defaults for the sensor bridge and the light
//! listener.

/// Default hysteresis band, in sensor units.
///
/// Zero means a plain threshold; configurations are expected to widen it.
pub const DEFAULT_HYSTERESIS: f32 = 0.0;

/// Consecutive failed reads before the bridge raises a status warning.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Default source identifier stamped on readings.
pub const DEFAULT_SOURCE_ID: &str = "ldr";

/// Default topic for raw readings.
pub const DEFAULT_READING_TOPIC: &str = "sensornetwork/ldr/light";

/// Default topic for bridge status events.
pub const DEFAULT_STATUS_TOPIC: &str = "sensornetwork/ldr/status";

/// Default topic for the light listener's rolling average.
pub const DEFAULT_AVERAGE_TOPIC: &str = "sensornetwork/ldr/average";
