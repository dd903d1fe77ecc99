//! Wi-Fi platform adapters.
//!
//! # Sub-modules
//!
//! - **`network_manager`** – [`WifiControl`](crate::application::connect_network::WifiControl)
//!   backed by NetworkManager's `nmcli`.  Link notifications come from a
//!   long-running `nmcli device monitor` child process.
//!
//! - **`mock`** – An in-memory, recording implementation for tests.  It never
//!   touches the host's network setup.
//!
//! - **`permission`** – A fixed answer to the network-info permission check,
//!   for platforms that have no such permission.

pub mod mock;
pub mod network_manager;
pub mod permission;

pub use mock::{MockWifiControl, WifiCall};
pub use network_manager::NetworkManagerWifi;
pub use permission::StaticPermission;
