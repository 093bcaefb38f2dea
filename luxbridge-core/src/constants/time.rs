//! Time-Related Constants
//!
//! Poll intervals, broker timing and supervisor cadence. All values are
//! defaults; every one of them can be overridden from configuration.

// ===== SENSOR POLLING =====

/// Default LDR poll interval (milliseconds).
///
/// 1 Hz is plenty for ambient light, which changes on the scale of minutes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default serial read timeout (milliseconds).
///
/// Shorter than the poll interval so a silent microcontroller costs at most
/// one cycle.
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 800;

// ===== BROKER CONNECTION =====

/// Default MQTT keepalive (seconds).
pub const DEFAULT_KEEPALIVE_S: u64 = 60;

/// First reconnect delay (milliseconds).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound for the exponential reconnect backoff (milliseconds).
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;

// ===== SUPERVISOR =====

/// Liveness heartbeat period (milliseconds).
pub const HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Time allowed for tasks to wind down after the shutdown signal (milliseconds).
pub const SHUTDOWN_GRACE_MS: u64 = 3000;
