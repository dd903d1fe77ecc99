//! Wire codec for the UDP discovery channel.
//!
//! Every datagram carries exactly one UTF-8 JSON object in one of two shapes:
//!
//! ```text
//! {"beacon": {"api": "<path>", "name": "<string>", "id": "<string>"}}
//! {"data":   {"name": "<string>", "type": "INT"|"UINT8"|"STRING", "value": <json>}}
//! ```
//!
//! A `beacon` announces that a device is alive; a `data` object pushes the
//! current value of one of the device's variables.  When an object carries
//! both keys the `beacon` wins.
//!
//! Embedded senders often transmit a fixed-size C buffer, so trailing NUL
//! bytes and whitespace are stripped before the JSON is parsed.

use std::str::Utf8Error;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::protocol::value::{Value, ValueError, ValueType};

/// UDP port devices broadcast their beacons to.
pub const DISCOVERY_PORT: u16 = 8003;

/// Default maximum datagram size accepted by the listener.
pub const RECEIVE_BUFFER_SIZE: usize = 256;

/// Errors produced while decoding a discovery datagram.
#[derive(Debug, Error)]
pub enum BeaconError {
    /// The payload is not valid UTF-8.
    #[error("payload is not UTF-8")]
    InvalidUtf8(#[source] Utf8Error),

    /// The payload is not a single JSON document.
    #[error("payload is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    /// The JSON document is not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The object carries neither a `beacon` nor a `data` key.
    #[error("object matches no known message shape")]
    UnrecognizedShape,

    /// A `beacon` or `data` section is missing fields or has the wrong types.
    #[error("malformed {section:?} section")]
    MalformedSection {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The `type` of a data broadcast is not a known wire type.
    #[error("unknown value type {0:?}")]
    UnknownType(String),

    /// The `value` of a data broadcast does not fit its declared type.
    #[error("invalid value for variable {name:?}")]
    InvalidValue {
        name: String,
        #[source]
        source: ValueError,
    },
}

/// A device announcing it is alive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceBeacon {
    /// Path of the device's HTTP API, relative to its address.
    pub api: String,
    pub name: String,
    pub id: String,
}

/// A device pushing the current value of one of its variables.
///
/// The declared wire type is carried by the [`Value`] variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBroadcast {
    pub name: String,
    pub value: Value,
}

/// A decoded discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconMessage {
    Presence(PresenceBeacon),
    Broadcast(DataBroadcast),
}

#[derive(Deserialize)]
struct DataWire {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    value: serde_json::Value,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one discovery datagram.
///
/// # Errors
///
/// Returns [`BeaconError`] for anything that is not one of the two message
/// shapes.  Callers are expected to log and drop such datagrams.
///
/// # Examples
///
/// ```rust
/// use uconfig_core::protocol::beacon::{decode_beacon, BeaconMessage};
///
/// let msg = decode_beacon(br#"{"beacon":{"api":"/api","name":"Sensor","id":"01"}}"#).unwrap();
/// assert!(matches!(msg, BeaconMessage::Presence(ref p) if p.name == "Sensor"));
/// ```
pub fn decode_beacon(payload: &[u8]) -> Result<BeaconMessage, BeaconError> {
    let end = payload
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&payload[..end]).map_err(BeaconError::InvalidUtf8)?;

    let document: serde_json::Value =
        serde_json::from_str(text).map_err(BeaconError::InvalidJson)?;
    let serde_json::Value::Object(mut object) = document else {
        return Err(BeaconError::NotAnObject);
    };

    if let Some(section) = object.remove("beacon") {
        let presence = serde_json::from_value::<PresenceBeacon>(section).map_err(|source| {
            BeaconError::MalformedSection {
                section: "beacon",
                source,
            }
        })?;
        return Ok(BeaconMessage::Presence(presence));
    }

    if let Some(section) = object.remove("data") {
        let wire = serde_json::from_value::<DataWire>(section).map_err(|source| {
            BeaconError::MalformedSection {
                section: "data",
                source,
            }
        })?;
        let kind = ValueType::from_wire(&wire.kind)
            .ok_or_else(|| BeaconError::UnknownType(wire.kind.clone()))?;
        let value = decode_wire_value(kind, &wire.value).map_err(|source| {
            BeaconError::InvalidValue {
                name: wire.name.clone(),
                source,
            }
        })?;
        return Ok(BeaconMessage::Broadcast(DataBroadcast {
            name: wire.name,
            value,
        }));
    }

    Err(BeaconError::UnrecognizedShape)
}

/// Encodes a message into the JSON text a device would broadcast.
///
/// Numeric values are written as JSON numbers, strings as JSON strings.
pub fn encode_beacon(message: &BeaconMessage) -> Vec<u8> {
    let document = match message {
        BeaconMessage::Presence(p) => json!({
            "beacon": { "api": p.api, "name": p.name, "id": p.id }
        }),
        BeaconMessage::Broadcast(d) => {
            let value = match &d.value {
                Value::Byte(b) => json!(b),
                Value::Int(i) => json!(i),
                Value::String(s) => json!(s),
            };
            json!({
                "data": { "name": d.name, "type": d.value.value_type().as_wire(), "value": value }
            })
        }
    };
    document.to_string().into_bytes()
}

// ── Value decoding ────────────────────────────────────────────────────────────

/// Converts the JSON `value` of a data broadcast into a typed [`Value`].
///
/// Numeric types accept a JSON integer or a string holding an integer
/// literal.  `STRING` accepts a JSON string or a number rendered as text.
fn decode_wire_value(kind: ValueType, raw: &serde_json::Value) -> Result<Value, ValueError> {
    let format_err = || ValueError::Format {
        kind,
        text: raw.to_string(),
    };
    let range_err = || ValueError::Range {
        kind,
        text: raw.to_string(),
    };

    match (kind, raw) {
        (ValueType::String, serde_json::Value::String(s)) => Value::text(s.as_str()),
        (ValueType::String, serde_json::Value::Number(n)) => Value::text(n.to_string()),
        (_, serde_json::Value::String(s)) => Value::parse(kind, s),
        (_, serde_json::Value::Number(n)) => {
            let Some(i) = n.as_i64() else {
                // u64 above i64::MAX is still an integer, anything else is a float.
                return Err(if n.is_u64() { range_err() } else { format_err() });
            };
            match kind {
                ValueType::Byte => u8::try_from(i).map(Value::Byte).map_err(|_| range_err()),
                _ => i32::try_from(i).map(Value::Int).map_err(|_| range_err()),
            }
        }
        _ => Err(format_err()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_presence_beacon() {
        // Arrange
        let payload = br#"{"beacon":{"api":"/api","name":"Sensor","id":"01"}}"#;

        // Act
        let msg = decode_beacon(payload).unwrap();

        // Assert
        assert_eq!(
            msg,
            BeaconMessage::Presence(PresenceBeacon {
                api: "/api".to_string(),
                name: "Sensor".to_string(),
                id: "01".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_strips_trailing_nul_padding() {
        let mut payload = br#"{"data":{"name":"led","type":"UINT8","value":1}}"#.to_vec();
        payload.extend_from_slice(&[0u8; 32]);

        let msg = decode_beacon(&payload).unwrap();

        assert!(matches!(msg, BeaconMessage::Broadcast(ref d) if d.value == Value::Byte(1)));
    }

    #[test]
    fn test_decode_beacon_takes_precedence_over_data() {
        let payload = br#"{"data":{"name":"x","type":"INT","value":1},"beacon":{"api":"/","name":"n","id":"i"}}"#;

        let msg = decode_beacon(payload).unwrap();

        assert!(matches!(msg, BeaconMessage::Presence(_)));
    }

    #[test]
    fn test_decode_int_accepts_numeric_string() {
        let payload = br#"{"data":{"name":"t","type":"INT","value":"-0x10"}}"#;

        let msg = decode_beacon(payload).unwrap();

        assert!(matches!(msg, BeaconMessage::Broadcast(ref d) if d.value == Value::Int(-16)));
    }

    #[test]
    fn test_decode_uint8_out_of_range_is_rejected() {
        let payload = br#"{"data":{"name":"led","type":"UINT8","value":300}}"#;

        let err = decode_beacon(payload).unwrap_err();

        assert!(matches!(
            err,
            BeaconError::InvalidValue { source: ValueError::Range { .. }, .. }
        ));
    }

    #[test]
    fn test_decode_int_out_of_i32_is_rejected() {
        let payload = br#"{"data":{"name":"n","type":"INT","value":4294967296}}"#;

        assert!(matches!(
            decode_beacon(payload),
            Err(BeaconError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_type_is_rejected() {
        let payload = br#"{"data":{"name":"f","type":"FLOAT","value":1.5}}"#;

        assert!(matches!(decode_beacon(payload), Err(BeaconError::UnknownType(t)) if t == "FLOAT"));
    }

    #[test]
    fn test_decode_rejects_non_object_and_unknown_shape() {
        assert!(matches!(decode_beacon(b"[1,2]"), Err(BeaconError::NotAnObject)));
        assert!(matches!(decode_beacon(b"{\"hello\":1}"), Err(BeaconError::UnrecognizedShape)));
        assert!(matches!(decode_beacon(b"not json"), Err(BeaconError::InvalidJson(_))));
        assert!(matches!(decode_beacon(&[0xFF, 0xFE]), Err(BeaconError::InvalidUtf8(_))));
        assert!(matches!(decode_beacon(b""), Err(BeaconError::InvalidJson(_))));
    }

    #[test]
    fn test_decode_presence_missing_field_is_malformed() {
        let payload = br#"{"beacon":{"api":"/api","name":"Sensor"}}"#;

        assert!(matches!(
            decode_beacon(payload),
            Err(BeaconError::MalformedSection { section: "beacon", .. })
        ));
    }

    #[test]
    fn test_decode_empty_string_value_is_rejected() {
        let payload = br#"{"data":{"name":"label","type":"STRING","value":""}}"#;

        assert!(matches!(decode_beacon(payload), Err(BeaconError::InvalidValue { .. })));
    }

    #[test]
    fn test_encode_then_decode_preserves_broadcast() {
        let original = BeaconMessage::Broadcast(DataBroadcast {
            name: "label".to_string(),
            value: Value::String("kitchen".to_string()),
        });

        let decoded = decode_beacon(&encode_beacon(&original)).unwrap();

        assert_eq!(decoded, original);
    }
}
