//! Domain entities for uConfig.
//!
//! This module contains pure rules with no infrastructure dependencies: how
//! device presence decays, the vocabulary of a connection session, how a
//! provisioning network's credential is derived, and what a device declares
//! in its schema.
//!
//! # Why keep this separate? (for beginners)
//!
//! Code in this layer never opens a socket, spawns a thread or sleeps.  The
//! host crate's `application` and `infrastructure` layers depend on it, never
//! the other way around, so everything here can be tested with plain
//! `#[test]` functions and no setup.

/// Connection session states, link notifications and network credentials.
pub mod connection;

/// Liveness counters and device naming.
pub mod presence;

/// Device schema documents.
pub mod schema;
