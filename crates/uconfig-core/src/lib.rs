//! # uconfig-core
//!
//! Shared library for uConfig containing the discovery wire codec, the typed
//! value codec and the domain rules for device presence and connection
//! sessions.
//!
//! It has no dependencies on sockets, threads or the platform network stack;
//! the `uconfig-host` crate supplies those.
//!
//! # Architecture overview (for beginners)
//!
//! uConfig lets an operator find small devices that announce themselves on
//! the local network and briefly join the Wi-Fi access point such a device
//! exposes in order to configure it.
//!
//! - **`protocol`** – How bytes travel over the discovery channel.  Each UDP
//!   datagram is one JSON object: either a presence beacon or a value
//!   broadcast.  Values are typed (`UINT8`, `INT`, `STRING`) and parsed
//!   strictly.
//!
//! - **`domain`** – Pure rules with no I/O: the decaying liveness counter of
//!   a device, the states and signals of a connection session, how the key
//!   of a provisioning network is derived, and the schema a device publishes.

pub mod domain;
pub mod protocol;

pub use domain::connection::{
    derive_target, ConnectionState, Credential, LinkState, NetworkTarget, SessionSignal,
    TargetError, OPEN_NETWORK_SENTINEL,
};
pub use domain::presence::{api_location, display_name, Ttl, MAX_TTL, TICK_INTERVAL};
pub use domain::schema::{ActionSpec, DeviceSchema, SchemaError, VariableSpec};
pub use protocol::beacon::{
    decode_beacon, encode_beacon, BeaconError, BeaconMessage, DataBroadcast, PresenceBeacon,
    DISCOVERY_PORT, RECEIVE_BUFFER_SIZE,
};
pub use protocol::value::{Value, ValueError, ValueType};
