//! Event Payloads Published by the Control Loop
//!
//! ## Overview
//!
//! Besides raw readings, two kinds of event leave the agent:
//!
//! - [`ThresholdEvent`]: the light listener's smoothed average crossed its
//!   threshold (one per transition, never per sample)
//! - [`StatusEvent`]: the sensor bridge lost or regained its sensor
//!
//! ```text
//! {"state":"on","value":182.5,"threshold":200.0,"timestamp":64000}
//! {"level":"warning","kind":"sensor_lost","consecutive_failures":5,"timestamp":90000}
//! ```
//!
//! Both serialize with serde into the compact JSON shown above. Names are
//! lowercase snake case on the wire so subscribers written in any language
//! can match on them.

use alloc::vec::Vec;

use serde::Serialize;

use crate::threshold::Edge;
use crate::time::Timestamp;

/// Wire name of a latch transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchState {
    /// Output became active
    On,
    /// Output released
    Off,
}

impl From<Edge> for SwitchState {
    fn from(edge: Edge) -> Self {
        match edge {
            Edge::On => SwitchState::On,
            Edge::Off => SwitchState::Off,
        }
    }
}

/// Smoothed value crossed its threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdEvent {
    /// Direction of the crossing
    pub state: SwitchState,
    /// Average that caused it
    pub value: f32,
    /// Threshold that was crossed
    pub threshold: f32,
    /// When the crossing was observed
    pub timestamp: Timestamp,
}

impl ThresholdEvent {
    /// Build from a latch transition
    pub fn new(edge: Edge, value: f32, threshold: f32, timestamp: Timestamp) -> Self {
        Self { state: edge.into(), value, threshold, timestamp }
    }

    /// Serialize for publishing
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Severity of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    /// Informational, e.g. recovery
    Info,
    /// Needs attention
    Warning,
}

/// What happened to the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Consecutive failures reached the escalation limit
    SensorLost,
    /// First good read after a loss
    SensorRecovered,
}

/// Sensor health change reported by the bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    /// Severity
    pub level: StatusLevel,
    /// Event kind
    pub kind: StatusKind,
    /// Failures in a row at the time of the event
    pub consecutive_failures: u32,
    /// When it happened
    pub timestamp: Timestamp,
}

impl StatusEvent {
    /// Sensor has failed `consecutive_failures` times in a row
    pub fn sensor_lost(consecutive_failures: u32, timestamp: Timestamp) -> Self {
        Self {
            level: StatusLevel::Warning,
            kind: StatusKind::SensorLost,
            consecutive_failures,
            timestamp,
        }
    }

    /// Sensor answered again after an outage of `consecutive_failures` reads
    pub fn sensor_recovered(consecutive_failures: u32, timestamp: Timestamp) -> Self {
        Self {
            level: StatusLevel::Info,
            kind: StatusKind::SensorRecovered,
            consecutive_failures,
            timestamp,
        }
    }

    /// Serialize for publishing
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}
