//! Application layer use cases for the uConfig host.
//!
//! Use cases in this layer orchestrate the domain types from `uconfig_core`
//! and depend only on traits for anything that touches the platform, so the
//! infrastructure can be swapped (or mocked) without changing this code.
//!
//! # Sub-modules
//!
//! - **`device_registry`** – The decaying presence cache of live devices.
//!   Consumes decoded beacons, publishes copy-on-write device lists and
//!   forwards value broadcasts to per-device subscribers.
//!
//! - **`variable_feed`** – A broadcast subscriber that checks every value
//!   against the device's schema before exposing it.
//!
//! - **`connect_network`** – The connection state machine that joins a
//!   device's provisioning network and restores the previous network setup
//!   on every exit path.

pub mod connect_network;
pub mod device_registry;
pub mod variable_feed;
