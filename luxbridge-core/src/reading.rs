//! Light readings and their wire encoding
//!
//! A [`Reading`] is produced once per poll cycle by the sensor bridge and
//! consumed by the light listener. On the broker it travels as a
//! [`ReadingPayload`], a small JSON object:
//!
//! ```text
//! {"value":512.0,"timestamp":90210,"source":"ldr"}
//! ```
//!
//! `timestamp` and `source` are optional. The decoder is lenient in one more
//! way: a bare number (`512`, `512.0\n`) is accepted as a value, since simple
//! microcontroller firmware tends to publish exactly that.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::time::Timestamp;

/// One light sample, immutable once produced
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    source_id: String,
    value: f32,
    timestamp: Timestamp,
}

impl Reading {
    /// Create a reading from `source_id` taken at `timestamp`
    pub fn new(source_id: impl Into<String>, value: f32, timestamp: Timestamp) -> Self {
        Self {
            source_id: source_id.into(),
            value,
            timestamp,
        }
    }

    /// Sensor identifier
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Light value in normalized sensor units
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Monotonic timestamp in milliseconds
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Wire form of this reading
    pub fn to_payload(&self) -> ReadingPayload {
        ReadingPayload {
            value: self.value,
            timestamp: Some(self.timestamp),
            source: Some(self.source_id.clone()),
        }
    }
}

/// Wire encoding shared by the bridge and the listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    /// Light value
    pub value: f32,
    /// Producer's monotonic timestamp, if it sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Producer's sensor id, if it sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ReadingPayload {
    /// Serialize to bytes for publishing
    pub fn encode(&self) -> Vec<u8> {
        // A struct of plain fields cannot fail to serialize
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a payload received from the broker
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = core::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
        let text = text.trim();

        let payload = if text.starts_with('{') {
            serde_json::from_str::<ReadingPayload>(text).map_err(|e| DecodeError::Format {
                reason: e.to_string(),
            })?
        } else {
            let value = text.parse::<f32>().map_err(|_| DecodeError::Format {
                reason: if text.is_empty() {
                    "empty payload".into()
                } else {
                    alloc::format!("not a number: {text:?}")
                },
            })?;
            ReadingPayload { value, timestamp: None, source: None }
        };

        if !payload.value.is_finite() {
            return Err(DecodeError::NotFinite);
        }
        Ok(payload)
    }

    /// Turn into a [`Reading`], falling back to `default_source` and
    /// restamping with the consumer's own clock
    pub fn into_reading(self, default_source: &str, received_at: Timestamp) -> Reading {
        let source = self.source.unwrap_or_else(|| default_source.to_string());
        Reading::new(source, self.value, received_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_payload_roundtrip() {
        let reading = Reading::new("ldr", 412.5, 9000);
        let bytes = reading.to_payload().encode();
        let decoded = ReadingPayload::decode(&bytes).unwrap();

        assert_eq!(decoded.value, 412.5);
        assert_eq!(decoded.timestamp, Some(9000));
        assert_eq!(decoded.source.as_deref(), Some("ldr"));
    }

    #[test]
    fn bare_number_accepted() {
        let decoded = ReadingPayload::decode(b" 512\n").unwrap();
        assert_eq!(decoded.value, 512.0);
        assert!(decoded.timestamp.is_none());
        assert!(decoded.source.is_none());
    }

    #[test]
    fn minimal_json_accepted() {
        let decoded = ReadingPayload::decode(br#"{"value": 3}"#).unwrap();
        assert_eq!(decoded.value, 3.0);
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            ReadingPayload::decode(b"bright"),
            Err(DecodeError::Format { .. })
        ));
        assert!(matches!(ReadingPayload::decode(b""), Err(DecodeError::Format { .. })));
        assert_eq!(ReadingPayload::decode(&[0xff, 0xfe]), Err(DecodeError::NotUtf8));
        assert_eq!(ReadingPayload::decode(b"NaN"), Err(DecodeError::NotFinite));
    }

    #[test]
    fn source_falls_back_to_topic() {
        let reading = ReadingPayload::decode(b"7")
            .unwrap()
            .into_reading("sensors/3/light", 42);

        assert_eq!(reading.source_id(), "sensors/3/light");
        assert_eq!(reading.timestamp(), 42);
        assert_eq!(reading.value(), 7.0);
    }
}
