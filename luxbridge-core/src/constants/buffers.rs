//! Buffer Sizes and Memory Constraints

// ===== AVERAGING WINDOW =====

/// Default number of samples in the rolling light average.
///
/// 10 samples at the default 1 Hz poll rate smooths over passing shadows
/// without lagging a sunset by more than a few seconds.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Hard cap on retained samples, for count and time windows alike.
///
/// A time window fed by a misbehaving publisher must not grow without bound.
pub const MAX_WINDOW_SAMPLES: usize = 4096;

// ===== BROKER QUEUES =====

/// Capacity of the outbound request queue between client and event loop.
///
/// Publishes beyond this are dropped, never awaited.
pub const DEFAULT_REQUEST_QUEUE: usize = 64;

/// Capacity of the connection state transition channel.
pub const STATE_CHANNEL_CAPACITY: usize = 32;

// ===== GPIO =====

/// Number of pins the in-memory GPIO backend models (BCM 0..=63).
pub const MEMORY_GPIO_PINS: usize = 64;
