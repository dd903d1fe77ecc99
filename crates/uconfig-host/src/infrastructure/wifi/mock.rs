//! Mock Wi-Fi backend for tests.
//!
//! # Why a mock backend?
//!
//! The real backend reconfigures the host's network: running it in a test
//! would drop the machine off its network and needs a Wi-Fi adapter and a
//! device access point nearby.
//!
//! `MockWifiControl` replaces every platform call with in-memory recording.
//! Each call is pushed into a `Mutex<Vec<WifiCall>>` so that test assertions
//! can inspect exactly what the controller asked for and in what order.  The
//! answers to queries (saved profiles, current SSID, scan results) are set by
//! the test, and [`MockWifiControl::emit`] plays the role of the platform's
//! connectivity service.
//!
//! # Usage in tests
//!
//! ```ignore
//! let wifi = Arc::new(MockWifiControl::new());
//! let controller = ConnectionController::new(target, wifi.clone(), permission, settings);
//! controller.start();
//!
//! wifi.set_current_ssid(Some("uConfig 1234"));
//! wifi.emit(LinkState::Connected);
//!
//! assert!(wifi.calls().contains(&WifiCall::Enable(1)));
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uconfig_core::{Credential, LinkState};

use crate::application::connect_network::{
    LinkEventSink, ListenerToken, NetworkId, WifiControl, WifiError,
};

/// One recorded platform request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiCall {
    FindSaved(String),
    Add { ssid: String, open: bool },
    Disconnect,
    Enable(NetworkId),
    Disable(NetworkId),
    Remove(NetworkId),
    Reconnect,
    StartScan,
    RegisterListener(ListenerToken),
    UnregisterListener(ListenerToken),
}

/// A mock backend that records all calls without touching the host.
#[derive(Default)]
pub struct MockWifiControl {
    calls: Mutex<Vec<WifiCall>>,
    saved: Mutex<Vec<(NetworkId, String)>>,
    current_ssid: Mutex<Option<String>>,
    visible: Mutex<Vec<String>>,
    listeners: Mutex<Vec<(ListenerToken, LinkEventSink)>>,
    next_network: AtomicU32,
    next_token: AtomicU64,
    /// When `true`, `add_network` fails with [`WifiError::Rejected`].
    reject_add: AtomicBool,
}

impl MockWifiControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-saves a profile, as if the operator had joined it before.
    pub fn with_saved_network(self, ssid: &str) -> Self {
        let id = self.allocate_network();
        lock(&self.saved).push((id, ssid.to_string()));
        self
    }

    pub fn set_current_ssid(&self, ssid: Option<&str>) {
        *lock(&self.current_ssid) = ssid.map(str::to_string);
    }

    pub fn set_visible_ssids(&self, ssids: &[&str]) {
        *lock(&self.visible) = ssids.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_reject_add(&self, reject: bool) {
        self.reject_add.store(reject, Ordering::SeqCst);
    }

    /// Delivers a link notification to every registered listener.
    ///
    /// Returns the number of listeners that accepted it.
    pub fn emit(&self, state: LinkState) -> usize {
        lock(&self.listeners)
            .iter()
            .filter(|(_, sink)| sink.notify(state))
            .count()
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<WifiCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, call: &WifiCall) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Profiles currently saved, including ones added by a session.
    pub fn saved_networks(&self) -> Vec<(NetworkId, String)> {
        lock(&self.saved).clone()
    }

    fn record(&self, call: WifiCall) {
        lock(&self.calls).push(call);
    }

    fn allocate_network(&self) -> NetworkId {
        self.next_network.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl WifiControl for MockWifiControl {
    async fn find_saved_network(&self, ssid: &str) -> Result<Option<NetworkId>, WifiError> {
        self.record(WifiCall::FindSaved(ssid.to_string()));
        Ok(lock(&self.saved)
            .iter()
            .find(|(_, s)| s == ssid)
            .map(|(id, _)| *id))
    }

    async fn add_network(
        &self,
        ssid: &str,
        credential: &Credential,
    ) -> Result<NetworkId, WifiError> {
        self.record(WifiCall::Add {
            ssid: ssid.to_string(),
            open: credential.is_open(),
        });
        if self.reject_add.load(Ordering::SeqCst) {
            return Err(WifiError::Rejected("injected failure".to_string()));
        }
        let id = self.allocate_network();
        lock(&self.saved).push((id, ssid.to_string()));
        Ok(id)
    }

    async fn disconnect(&self) -> Result<(), WifiError> {
        self.record(WifiCall::Disconnect);
        Ok(())
    }

    async fn enable_network(&self, id: NetworkId) -> Result<(), WifiError> {
        self.record(WifiCall::Enable(id));
        Ok(())
    }

    async fn disable_network(&self, id: NetworkId) -> Result<(), WifiError> {
        self.record(WifiCall::Disable(id));
        Ok(())
    }

    async fn remove_network(&self, id: NetworkId) -> Result<(), WifiError> {
        self.record(WifiCall::Remove(id));
        lock(&self.saved).retain(|(saved, _)| *saved != id);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), WifiError> {
        self.record(WifiCall::Reconnect);
        Ok(())
    }

    async fn current_ssid(&self) -> Option<String> {
        lock(&self.current_ssid).clone()
    }

    async fn visible_ssids(&self) -> Vec<String> {
        lock(&self.visible).clone()
    }

    async fn start_scan(&self) -> Result<(), WifiError> {
        self.record(WifiCall::StartScan);
        Ok(())
    }

    async fn register_link_listener(
        &self,
        sink: LinkEventSink,
    ) -> Result<ListenerToken, WifiError> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(WifiCall::RegisterListener(token));
        lock(&self.listeners).push((token, sink));
        Ok(token)
    }

    fn unregister_link_listener(&self, token: ListenerToken) {
        self.record(WifiCall::UnregisterListener(token));
        lock(&self.listeners).retain(|(t, _)| *t != token);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_saved_network_is_found() {
        let wifi = MockWifiControl::new().with_saved_network("Home");

        assert_eq!(wifi.find_saved_network("Home").await.unwrap(), Some(1));
        assert_eq!(wifi.find_saved_network("Other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_then_remove_round_trips_profile() {
        let wifi = MockWifiControl::new();

        let id = wifi.add_network("uConfig 1234", &Credential::Open).await.unwrap();
        wifi.remove_network(id).await.unwrap();

        assert!(wifi.saved_networks().is_empty());
        assert_eq!(
            wifi.calls(),
            vec![
                WifiCall::Add {
                    ssid: "uConfig 1234".into(),
                    open: true
                },
                WifiCall::Remove(id),
            ]
        );
    }

    #[tokio::test]
    async fn test_emit_reaches_registered_listener_only() {
        // Arrange
        let wifi = MockWifiControl::new();
        let (tx, mut rx) = mpsc::channel(4);
        let token = wifi.register_link_listener(LinkEventSink::new(tx)).await.unwrap();

        // Act
        let delivered = wifi.emit(LinkState::Connected);
        wifi.unregister_link_listener(token);
        let after = wifi.emit(LinkState::Disconnected);

        // Assert
        assert_eq!(delivered, 1);
        assert_eq!(after, 0);
        assert_eq!(rx.try_recv().unwrap(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_reject_add_returns_error() {
        let wifi = MockWifiControl::new();
        wifi.set_reject_add(true);

        assert!(matches!(
            wifi.add_network("x", &Credential::Open).await,
            Err(WifiError::Rejected(_))
        ));
    }
}
