//! Light trace generators
//!
//! LDR values from the microcontroller are 10-bit counts (0..=1023) once
//! `full_scale` is not applied. Generators stay inside that range so the
//! float arithmetic in the tests is exact enough to compare with a tolerance.

use proptest::prelude::*;

use luxbridge_core::{Reading, Timestamp};

/// Largest raw count an Arduino ADC reports
pub const ADC_MAX: f32 = 1023.0;

/// Any single raw light value
pub fn light_value() -> impl Strategy<Value = f32> {
    0.0f32..=ADC_MAX
}

/// A trace of raw values
pub fn light_trace(max_len: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(light_value(), 0..max_len)
}

/// Readings one poll interval apart
pub fn readings(values: &[f32], interval_ms: u64) -> Vec<Reading> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| Reading::new("ldr", v, i as Timestamp * interval_ms))
        .collect()
}

/// Reference mean, accumulated in f64
pub fn mean(values: &[f32]) -> f32 {
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    (sum / values.len() as f64) as f32
}
