//! Threshold Crossing with Hysteresis
//!
//! A plain `value > threshold` comparison toggles on every sample while an
//! LDR hovers at the boundary, which means relays clicking and a flood of
//! events. [`Latch`] keeps the last fired direction as state and only
//! releases once the value has moved back past the hysteresis band:
//!
//! ```text
//!   on_above = T, hysteresis = h
//!
//!   value ─────────────╮      ╭──╮ ╭─────────────
//!   T     ─ ─ ─ ─ ─ ─ ─│─ ─ ─ ┼ ─┼─┼ ─ ─ ─ ─ ─ ─    ON fires once when value >= T
//!   T-h   ─ ─ ─ ─ ─ ─ ─│─╮ ╭─ ┼ ─ ─ ─ ─ ─ ─ ─ ─    OFF fires once when value < T-h
//!                      ╰─╯ ╰──╯
//! ```
//!
//! A [`Trigger`] may carry a lower bound (`on_below`, active while dark), an
//! upper bound (`on_above`, active while bright), or both. With both, the
//! output is active while either band is latched.

use crate::constants::DEFAULT_HYSTERESIS;
use crate::errors::ThresholdError;

/// Direction of a latch transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Output became active
    On,
    /// Output released
    Off,
}

impl Edge {
    /// Lowercase name used in event payloads
    pub const fn as_str(&self) -> &'static str {
        match self {
            Edge::On => "on",
            Edge::Off => "off",
        }
    }
}

/// Static threshold configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    on_below: Option<f32>,
    on_above: Option<f32>,
    hysteresis: f32,
}

impl Trigger {
    /// Build a trigger from optional bounds and a hysteresis band
    pub fn new(
        on_below: Option<f32>,
        on_above: Option<f32>,
        hysteresis: f32,
    ) -> Result<Self, ThresholdError> {
        if on_below.is_none() && on_above.is_none() {
            return Err(ThresholdError::Unbounded);
        }
        if !hysteresis.is_finite() || hysteresis < 0.0 {
            return Err(ThresholdError::InvalidHysteresis { hysteresis });
        }
        for value in on_below.into_iter().chain(on_above) {
            if !value.is_finite() {
                return Err(ThresholdError::NotFinite { value });
            }
        }
        if let (Some(below), Some(above)) = (on_below, on_above) {
            if below > above {
                return Err(ThresholdError::Inverted { on_below: below, on_above: above });
            }
        }
        Ok(Self { on_below, on_above, hysteresis })
    }

    /// Active at or above `threshold`
    pub fn above(threshold: f32, hysteresis: f32) -> Result<Self, ThresholdError> {
        Self::new(None, Some(threshold), hysteresis)
    }

    /// Active at or below `threshold`
    pub fn below(threshold: f32, hysteresis: f32) -> Result<Self, ThresholdError> {
        Self::new(Some(threshold), None, hysteresis)
    }

    /// Lower bound, if any
    pub fn on_below(&self) -> Option<f32> {
        self.on_below
    }

    /// Upper bound, if any
    pub fn on_above(&self) -> Option<f32> {
        self.on_above
    }

    /// Hysteresis band
    pub fn hysteresis(&self) -> f32 {
        self.hysteresis
    }

    /// Bound nearest to `value`, reported alongside crossing events
    pub fn reference(&self, value: f32) -> f32 {
        match (self.on_below, self.on_above) {
            (Some(below), Some(above)) => {
                if value <= below + (above - below) / 2.0 {
                    below
                } else {
                    above
                }
            }
            (Some(below), None) => below,
            (None, Some(above)) => above,
            // Unreachable: construction rejects unbounded triggers
            (None, None) => value,
        }
    }
}

/// Stateful comparator, remembers which side last fired
#[derive(Debug, Clone)]
pub struct Latch {
    trigger: Trigger,
    low_active: bool,
    high_active: bool,
}

impl Latch {
    /// Start released
    pub fn new(trigger: Trigger) -> Self {
        Self { trigger, low_active: false, high_active: false }
    }

    /// Configuration this latch applies
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Whether the output is currently active
    pub fn is_on(&self) -> bool {
        self.low_active || self.high_active
    }

    /// Feed one value, returns the transition it caused
    ///
    /// Non-finite values leave the latch untouched.
    pub fn update(&mut self, value: f32) -> Option<Edge> {
        if !value.is_finite() {
            return None;
        }
        let was_on = self.is_on();
        let h = self.trigger.hysteresis;

        if let Some(threshold) = self.trigger.on_above {
            if self.high_active {
                if value < threshold - h {
                    self.high_active = false;
                }
            } else if value >= threshold {
                self.high_active = true;
            }
        }

        if let Some(threshold) = self.trigger.on_below {
            if self.low_active {
                if value > threshold + h {
                    self.low_active = false;
                }
            } else if value <= threshold {
                self.low_active = true;
            }
        }

        match (was_on, self.is_on()) {
            (false, true) => Some(Edge::On),
            (true, false) => Some(Edge::Off),
            _ => None,
        }
    }

    /// Release without emitting
    pub fn reset(&mut self) {
        self.low_active = false;
        self.high_active = false;
    }
}

/// Pin plus the trigger that drives it, read-only after construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorThreshold {
    pin: u8,
    trigger: Trigger,
    active_low: bool,
}

impl ActuatorThreshold {
    /// Drive `pin` from `on_below` / `on_above` with `hysteresis`
    pub fn new(
        pin: u8,
        on_below: Option<f32>,
        on_above: Option<f32>,
        hysteresis: Option<f32>,
    ) -> Result<Self, ThresholdError> {
        let trigger = Trigger::new(on_below, on_above, hysteresis.unwrap_or(DEFAULT_HYSTERESIS))?;
        Ok(Self { pin, trigger, active_low: false })
    }

    /// Invert the output level, for relay boards that switch on low
    pub fn active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    /// Actuator pin
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Trigger configuration
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// Whether the pin is driven low when active
    pub fn is_active_low(&self) -> bool {
        self.active_low
    }
}
