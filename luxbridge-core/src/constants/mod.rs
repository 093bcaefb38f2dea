//! Constants for luxbridge Core
//!
//! Centralised defaults used throughout the control loop. Every numeric value
//! carries its unit in the name.
//!
//! ## Organization
//!
//! - **Time**: poll intervals, broker timing, supervisor cadence
//! - **Buffers**: window sizes and queue capacities
//! - **Control**: threshold and escalation defaults

/// Time-related constants for intervals, timeouts, and backoff.
pub mod time;

/// Buffer sizes and queue capacities.
pub mod buffers;

/// Threshold, escalation and topic defaults.
pub mod control;

pub use time::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS, DEFAULT_KEEPALIVE_S, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SERIAL_TIMEOUT_MS, HEARTBEAT_INTERVAL_MS, SHUTDOWN_GRACE_MS,
};

pub use buffers::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SAMPLES, MEMORY_GPIO_PINS};

pub use control::{
    DEFAULT_AVERAGE_TOPIC, DEFAULT_HYSTERESIS, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_READING_TOPIC, DEFAULT_SOURCE_ID, DEFAULT_STATUS_TOPIC,
};
