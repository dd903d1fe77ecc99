//! Discovery infrastructure for the uConfig host.
//!
//! # Sub-modules
//!
//! - **`beacon_listener`** – Binds the UDP discovery port and forwards every
//!   decoded datagram to a [`BeaconObserver`](crate::application::device_registry::BeaconObserver)
//!   from a dedicated receive thread.
//!
//! - **`decay_ticker`** – Ages the device registry at a fixed interval from
//!   its own thread, independent of beacon traffic.

pub mod beacon_listener;
pub mod decay_ticker;

use thiserror::Error;

pub use beacon_listener::{start_beacon_listener, BeaconListener};
pub use decay_ticker::{spawn_decay_ticker, DecayTicker};

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}")]
    BindFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket was bound but could not be configured.
    #[error("failed to configure discovery socket")]
    Configure(#[source] std::io::Error),

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
