//! Infrastructure layer for the uConfig host.
//!
//! Contains OS-facing adapters: the UDP beacon listener and decay ticker,
//! Wi-Fi control backends and file-system configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `uconfig_core`, but MUST NOT be imported by the `application` layer.

pub mod discovery;
pub mod storage;
pub mod wifi;
