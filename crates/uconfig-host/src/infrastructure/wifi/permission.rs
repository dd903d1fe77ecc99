//! Fixed network-info permission.
//!
//! Desktop platforms let any user read the current SSID, so the controller's
//! permission check is answered with a constant.  The answer can still be
//! flipped at runtime, which tests use to simulate a revoked permission.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::application::connect_network::PermissionProbe;

#[derive(Debug)]
pub struct StaticPermission {
    granted: AtomicBool,
}

impl StaticPermission {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    pub fn set(&self, granted: bool) {
        self.granted.store(granted, Ordering::Release);
    }
}

impl Default for StaticPermission {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PermissionProbe for StaticPermission {
    fn network_info_granted(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }
}
