//! Device liveness and naming.
//!
//! A device is considered alive for as long as its [`Ttl`] stays above zero.
//! Every beacon resets the counter to its maximum; every tick of the decay
//! ticker lowers it by one.  With the defaults ([`MAX_TTL`] ticks of
//! [`TICK_INTERVAL`]) a device that stops announcing disappears after 45 s.

use std::net::IpAddr;
use std::time::Duration;

/// Default number of ticks a device survives without a beacon.
pub const MAX_TTL: u16 = 180;

/// Default interval between two decay ticks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Remaining lifetime of a device, in ticks.
///
/// Invariant: `0 <= remaining <= max` and `max >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl {
    remaining: u16,
    max: u16,
}

impl Ttl {
    /// Creates a counter starting at `max` (a `max` of 0 is raised to 1).
    pub fn new(max: u16) -> Self {
        let max = max.max(1);
        Self {
            remaining: max,
            max,
        }
    }

    /// Resets the counter to its maximum.
    pub fn touch(&mut self) {
        self.remaining = self.max;
    }

    /// Lowers the counter by one, never below zero.
    ///
    /// Returns `true` when the counter is zero after the tick, meaning the
    /// device has expired.
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Self::new(MAX_TTL)
    }
}

/// Name shown to the operator for a device: `"<name> (<id>)"`.
pub fn display_name(name: &str, id: &str) -> String {
    format!("{name} ({id})")
}

/// Base URL of a device's HTTP API.
///
/// IPv6 addresses are bracketed so the result is a valid URL authority.
///
/// ```rust
/// use std::net::IpAddr;
/// use uconfig_core::domain::presence::api_location;
///
/// let v4: IpAddr = "192.168.4.1".parse().unwrap();
/// assert_eq!(api_location(v4, "/api"), "http://192.168.4.1/api");
/// let v6: IpAddr = "fe80::1".parse().unwrap();
/// assert_eq!(api_location(v6, "/api"), "http://[fe80::1]/api");
/// ```
pub fn api_location(address: IpAddr, api: &str) -> String {
    match address {
        IpAddr::V4(v4) => format!("http://{v4}{api}"),
        IpAddr::V6(v6) => format!("http://[{v6}]{api}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
