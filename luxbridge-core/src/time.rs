//! Time management for the control loop
//!
//! Readings carry a monotonic timestamp in milliseconds. The only thing that
//! matters about it is ordering and spacing within one process, so every
//! component draws from a [`TimeSource`] instead of the wall clock:
//! - [`MonotonicTime`] for the running agent (std only)
//! - [`MockTimeSource`] for tests, advanced by hand

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::sync::Arc;

/// Timestamp in milliseconds since the time source was created
pub type Timestamp = u64;

/// Source of time for the system
pub trait TimeSource: Send + Sync {
    /// Get current timestamp in milliseconds
    fn now(&self) -> Timestamp;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Monotonic time source backed by [`std::time::Instant`]
///
/// Starts at 0 on creation, never goes backwards
#[cfg(feature = "std")]
#[derive(Debug, Clone)]
pub struct MonotonicTime {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl MonotonicTime {
    /// Start counting from now
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

#[cfg(feature = "std")]
impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl TimeSource for MonotonicTime {
    fn now(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }
}

/// Hand-driven time source for testing
///
/// Interior mutability lets a test keep one `Arc<MockTimeSource>` while the
/// component under test holds another.
#[derive(Debug, Default)]
pub struct MockTimeSource {
    timestamp: AtomicU64,
}

impl MockTimeSource {
    /// Start at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp: AtomicU64::new(timestamp) }
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, timestamp: Timestamp) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    /// Move forward by `ms`
    pub fn advance(&self, ms: u64) {
        self.timestamp.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        self.timestamp.load(Ordering::SeqCst)
    }
}
