//! Protocol module containing the typed value codec and the discovery wire codec.

pub mod beacon;
pub mod value;

pub use beacon::{
    decode_beacon, encode_beacon, BeaconError, BeaconMessage, DataBroadcast, PresenceBeacon,
    DISCOVERY_PORT, RECEIVE_BUFFER_SIZE,
};
pub use value::{decode_integer_literal, LiteralError, Value, ValueError, ValueType};
