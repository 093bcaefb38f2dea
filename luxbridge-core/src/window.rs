//! Bounded Sliding Window for the Rolling Light Average
//!
//! ## Overview
//!
//! The light listener smooths the raw LDR signal by averaging over the most
//! recent readings. [`SampleWindow`] holds those readings in arrival order and
//! evicts the oldest as new ones arrive. It supports two kinds of bound:
//!
//! - **Count**: keep the last `N` readings
//! - **Time**: keep readings no older than `T` milliseconds relative to the
//!   newest, never more than [`MAX_WINDOW_SAMPLES`]
//!
//! ## Invariants
//!
//! - `len() <= capacity()` in every reachable state
//! - Readings iterate oldest to newest
//! - The average is always derived from what is currently retained; it is
//!   never cached apart from the readings
//!
//! ```text
//! WindowSpec::Count { size: 3 }
//!
//! push 10   [10]          avg 10
//! push 20   [10, 20]      avg 15
//! push 30   [10, 20, 30]  avg 20
//! push 40   [20, 30, 40]  avg 30   ← 10 evicted
//! ```
//!
//! ## Usage Example
//!
//! ```rust
//! use luxbridge_core::reading::Reading;
//! use luxbridge_core::window::{SampleWindow, WindowSpec};
//!
//! let mut window = SampleWindow::new(WindowSpec::Count { size: 3 }).unwrap();
//! assert_eq!(window.average(), None);
//!
//! window.push(Reading::new("ldr", 10.0, 0));
//! window.push(Reading::new("ldr", 20.0, 1000));
//! assert_eq!(window.average(), Some(15.0));
//! ```

use alloc::collections::VecDeque;

use crate::constants::MAX_WINDOW_SAMPLES;
use crate::errors::WindowError;
use crate::reading::Reading;
use crate::time::Timestamp;

/// How the window bounds its contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    /// Keep the last `size` readings
    Count {
        /// Number of retained readings
        size: usize,
    },
    /// Keep readings within `duration_ms` of the newest one
    Time {
        /// Span of retained readings
        duration_ms: u64,
    },
}

impl WindowSpec {
    /// Maximum number of readings this bound can retain
    pub fn capacity(&self) -> usize {
        match *self {
            WindowSpec::Count { size } => size,
            WindowSpec::Time { .. } => MAX_WINDOW_SAMPLES,
        }
    }

    fn validate(&self) -> Result<(), WindowError> {
        match *self {
            WindowSpec::Count { size: 0 } => Err(WindowError::ZeroSize),
            WindowSpec::Count { size } if size > MAX_WINDOW_SAMPLES => Err(WindowError::TooLarge {
                size,
                max: MAX_WINDOW_SAMPLES,
            }),
            WindowSpec::Time { duration_ms: 0 } => Err(WindowError::ZeroDuration),
            _ => Ok(()),
        }
    }
}

/// Sliding window of readings, single owner, single writer
#[derive(Debug, Clone)]
pub struct SampleWindow {
    spec: WindowSpec,
    readings: VecDeque<Reading>,
    /// Total readings evicted since creation
    evicted: u64,
}

impl SampleWindow {
    /// Create an empty window
    pub fn new(spec: WindowSpec) -> Result<Self, WindowError> {
        spec.validate()?;
        // Time windows start small and grow on demand
        let initial = spec.capacity().min(64);
        Ok(Self {
            spec,
            readings: VecDeque::with_capacity(initial),
            evicted: 0,
        })
    }

    /// Window bound
    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Insert a reading, evicting whatever falls outside the bound
    ///
    /// Returns the number of readings evicted by this insert.
    pub fn push(&mut self, reading: Reading) -> usize {
        let newest = reading.timestamp();
        self.readings.push_back(reading);

        let mut evicted = 0;
        if let WindowSpec::Time { duration_ms } = self.spec {
            evicted += self.evict_older_than(newest.saturating_sub(duration_ms));
        }
        while self.readings.len() > self.spec.capacity() {
            self.readings.pop_front();
            evicted += 1;
        }

        self.evicted += evicted as u64;
        evicted
    }

    /// Drop readings with a timestamp before `cutoff`
    ///
    /// Readings arrive in order, so eviction stops at the first one kept.
    fn evict_older_than(&mut self, cutoff: Timestamp) -> usize {
        let mut evicted = 0;
        while self
            .readings
            .front()
            .is_some_and(|oldest| oldest.timestamp() < cutoff)
        {
            self.readings.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Arithmetic mean of retained values, `None` when empty
    pub fn average(&self) -> Option<f32> {
        if self.readings.is_empty() {
            return None;
        }
        // Accumulate in f64
        let sum: f64 = self.readings.iter().map(|r| r.value() as f64).sum();
        Some((sum / self.readings.len() as f64) as f32)
    }

    /// Number of retained readings
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Maximum number of retained readings
    pub fn capacity(&self) -> usize {
        self.spec.capacity()
    }

    /// Most recent reading
    pub fn last(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Readings from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Readings evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
