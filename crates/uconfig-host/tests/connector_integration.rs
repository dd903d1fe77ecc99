//! Integration tests for the provisioning-network connector.
//!
//! Each test runs a real `ConnectionController` session against the
//! recording `MockWifiControl`.  The mock plays the platform's connectivity
//! service: the test sets what `current_ssid()` and the scan results return,
//! then calls `emit()` to deliver a link notification.
//!
//! Most tests use `start_paused = true`, so Tokio's clock only moves when
//! every task is idle.  The 100 ms settle delay and the 45 s event timeout
//! therefore elapse instantly and deterministically.
//!
//! # Timeline of a typical test
//!
//! ```text
//! start()                     worker: find/add profile, disconnect, settle
//! sleep(STARTUP)              worker: register listener, enable, Connecting
//! emit(..) + sleep(STEP)      worker: handles one notification
//! stop() + join()             worker: teardown, terminal signal
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use uconfig_core::{ConnectionState, LinkState, NetworkTarget, SessionSignal};
use uconfig_host::application::connect_network::{
    ConnectionController, ConnectorSettings, ExitReason,
};
use uconfig_host::infrastructure::wifi::{MockWifiControl, StaticPermission, WifiCall};

const SSID: &str = "uConfig 1234";
const STARTUP: Duration = Duration::from_millis(200);
const STEP: Duration = Duration::from_millis(10);

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    wifi: Arc<MockWifiControl>,
    permission: Arc<StaticPermission>,
    controller: Arc<ConnectionController>,
    progress: Arc<Mutex<Vec<(String, bool)>>>,
    signals: Arc<Mutex<Vec<SessionSignal>>>,
}

impl Harness {
    fn new(wifi: MockWifiControl, settings: ConnectorSettings) -> Self {
        let wifi = Arc::new(wifi);
        let permission = Arc::new(StaticPermission::new(true));
        let target = NetworkTarget::new(SSID, "abcd5678").unwrap();
        let controller = Arc::new(ConnectionController::new(
            target,
            wifi.clone(),
            permission.clone(),
            settings,
        ));

        let progress: Arc<Mutex<Vec<(String, bool)>>> = Arc::default();
        let signals: Arc<Mutex<Vec<SessionSignal>>> = Arc::default();
        let sink = Arc::clone(&progress);
        controller.set_progress_listener(Some(Arc::new(move |message: &str, abortable: bool| {
            sink.lock().unwrap().push((message.to_string(), abortable));
        })));
        let sink = Arc::clone(&signals);
        controller.set_state_listener(Some(Arc::new(move |signal: SessionSignal| {
            sink.lock().unwrap().push(signal);
        })));

        Self {
            wifi,
            permission,
            controller,
            progress,
            signals,
        }
    }

    fn with_defaults() -> Self {
        Self::new(MockWifiControl::new(), ConnectorSettings::default())
    }

    /// Starts the session and waits until it is in the event loop.
    async fn start(&self) {
        assert!(self.controller.start());
        tokio::time::sleep(STARTUP).await;
    }

    async fn emit(&self, state: LinkState) {
        assert_eq!(self.wifi.emit(state), 1, "listener must be registered");
        tokio::time::sleep(STEP).await;
    }

    fn messages(&self) -> Vec<String> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }

    fn signals(&self) -> Vec<SessionSignal> {
        self.signals.lock().unwrap().clone()
    }
}

// ── Association ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_wrong_network_then_target_yields_retry_then_connect() {
    // Arrange
    let h = Harness::with_defaults();
    h.start().await;

    // Act
    h.emit(LinkState::Connecting).await;
    h.wifi.set_current_ssid(Some("HomeWifi"));
    h.emit(LinkState::Connected).await;
    let before_match = h.signals();
    h.wifi.set_current_ssid(Some(SSID));
    h.emit(LinkState::Connected).await;

    // Assert
    assert!(before_match.is_empty());
    assert_eq!(h.signals(), [SessionSignal::Connect]);
    assert_eq!(h.controller.state(), ConnectionState::Associated);
    assert_eq!(
        *h.progress.lock().unwrap(),
        [
            ("Connecting to uConfig 1234...".to_string(), true),
            ("Connect fail, retrying".to_string(), true),
            ("Connected!".to_string(), true),
        ]
    );
    assert_eq!(h.wifi.count(&WifiCall::Enable(1)), 2);

    h.controller.stop();
    let outcome = h.controller.join().await.unwrap();
    assert_eq!(outcome.signal, SessionSignal::Finished);
    assert_eq!(h.signals(), [SessionSignal::Connect, SessionSignal::Finished]);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_after_association_reconnects() {
    // Arrange
    let h = Harness::with_defaults();
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));
    h.emit(LinkState::Connected).await;

    // Act
    h.emit(LinkState::Disconnected).await;

    // Assert
    assert_eq!(h.signals(), [SessionSignal::Connect, SessionSignal::Disconnect]);
    assert_eq!(h.controller.state(), ConnectionState::Connecting);
    assert_eq!(h.messages().last().map(String::as_str), Some("Reconnecting"));
    assert_eq!(h.wifi.count(&WifiCall::Enable(1)), 2);

    h.controller.stop();
    h.controller.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_suspended_and_unknown_are_ignored() {
    let h = Harness::with_defaults();
    h.start().await;

    h.emit(LinkState::Suspended).await;
    h.emit(LinkState::Unknown).await;

    assert_eq!(h.controller.state(), ConnectionState::Connecting);
    assert!(h.signals().is_empty());

    h.controller.stop();
    let outcome = h.controller.join().await.unwrap();
    assert_eq!(outcome.reason, ExitReason::Stopped);
}

// ── Stop and teardown ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_state_watch_follows_session_lifecycle() {
    // Arrange
    let h = Harness::with_defaults();
    let mut states = h.controller.watch_state();
    let recorder = tokio::spawn(async move {
        let mut seen = vec![*states.borrow_and_update()];
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == ConnectionState::Terminated {
                break;
            }
        }
        seen
    });
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));
    h.emit(LinkState::Connected).await;

    // Act
    h.controller.stop();
    h.controller.join().await.unwrap();
    let seen = recorder.await.unwrap();

    // Assert: teardown states may coalesce, but never precede a live state
    let live: Vec<_> = seen.iter().copied().filter(|s| !s.is_tearing_down()).collect();
    assert_eq!(
        live,
        [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Associated
        ]
    );
    let first_teardown = seen.iter().position(|s| s.is_tearing_down()).unwrap();
    assert!(seen[first_teardown..].iter().all(|s| s.is_tearing_down()));
    assert_eq!(seen.last(), Some(&ConnectionState::Terminated));
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_connecting_removes_temporary_profile() {
    // Arrange
    let h = Harness::with_defaults();
    h.start().await;

    // Act
    h.controller.stop();
    let outcome = h.controller.join().await.unwrap();

    // Assert
    assert_eq!(outcome.reason, ExitReason::Stopped);
    assert_eq!(outcome.signal, SessionSignal::Finished);
    assert_eq!(h.signals(), [SessionSignal::Finished]);
    assert_eq!(
        h.wifi.calls(),
        [
            WifiCall::FindSaved(SSID.to_string()),
            WifiCall::Add {
                ssid: SSID.to_string(),
                open: false
            },
            WifiCall::Disconnect,
            WifiCall::RegisterListener(1),
            WifiCall::Enable(1),
            WifiCall::UnregisterListener(1),
            WifiCall::Disable(1),
            WifiCall::Remove(1),
            WifiCall::Reconnect,
        ]
    );
    assert!(h.wifi.saved_networks().is_empty());
    assert_eq!(h.wifi.listener_count(), 0);
    assert_eq!(h.controller.state(), ConnectionState::Terminated);
    assert_eq!(
        h.progress.lock().unwrap().last().cloned(),
        Some(("Settings restored".to_string(), false))
    );
}

#[tokio::test(start_paused = true)]
async fn test_saved_profile_is_kept_after_session() {
    // Arrange
    let h = Harness::new(
        MockWifiControl::new().with_saved_network(SSID),
        ConnectorSettings::default(),
    );
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));
    h.emit(LinkState::Connected).await;

    // Act
    h.controller.stop();
    h.controller.join().await.unwrap();

    // Assert
    assert_eq!(h.wifi.saved_networks(), [(1, SSID.to_string())]);
    assert_eq!(h.wifi.count(&WifiCall::Remove(1)), 0);
    assert_eq!(h.wifi.count(&WifiCall::Disconnect), 2);
    assert_eq!(h.wifi.count(&WifiCall::Reconnect), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start_still_restores_once() {
    // Arrange
    let h = Harness::with_defaults();
    h.controller.stop();

    // Act
    assert!(h.controller.start());
    let outcome = h.controller.join().await.unwrap();

    // Assert
    assert_eq!(outcome.reason, ExitReason::Stopped);
    assert_eq!(h.signals(), [SessionSignal::Finished]);
    assert_eq!(h.wifi.calls(), [WifiCall::Reconnect]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let h = Harness::with_defaults();
    h.start().await;

    h.controller.stop();
    h.controller.stop();
    h.controller.join().await.unwrap();
    h.controller.stop();

    assert_eq!(h.signals(), [SessionSignal::Finished]);
    assert_eq!(h.wifi.count(&WifiCall::Reconnect), 1);
}

#[tokio::test(start_paused = true)]
async fn test_revoked_permission_at_teardown_reports_no_permission() {
    let h = Harness::with_defaults();
    h.start().await;

    h.permission.set(false);
    h.controller.stop();
    let outcome = h.controller.join().await.unwrap();

    assert_eq!(outcome.reason, ExitReason::Stopped);
    assert_eq!(outcome.signal, SessionSignal::NoPermission);
}

// ── Terminal conditions ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_missing_permission_at_connected_ends_session() {
    // Arrange
    let h = Harness::with_defaults();
    h.permission.set(false);
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));

    // Act
    h.wifi.emit(LinkState::Connected);
    let outcome = h.controller.join().await.unwrap();

    // Assert
    assert_eq!(outcome.reason, ExitReason::NoPermission);
    assert_eq!(h.signals(), [SessionSignal::NoPermission]);
    assert_eq!(h.wifi.count(&WifiCall::Remove(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_three_scan_misses_end_with_network_gone() {
    // Arrange
    let h = Harness::with_defaults();
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));
    h.wifi.set_visible_ssids(&["HomeWifi"]);

    // Act
    h.emit(LinkState::Disconnected).await;
    h.emit(LinkState::Disconnected).await;
    let still_running = h.signals().is_empty();
    h.wifi.emit(LinkState::Disconnected);
    let outcome = h.controller.join().await.unwrap();

    // Assert
    assert!(still_running);
    assert_eq!(outcome.reason, ExitReason::NetworkGone);
    assert_eq!(outcome.signal, SessionSignal::Finished);
    assert_eq!(h.wifi.count(&WifiCall::StartScan), 3);
    let messages = h.messages();
    assert_eq!(
        messages[messages.len() - 2..],
        ["Network gone".to_string(), "Settings restored".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_visible_target_does_not_count_as_scan_miss() {
    let h = Harness::with_defaults();
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));
    h.wifi.set_visible_ssids(&[SSID]);

    for _ in 0..5 {
        h.emit(LinkState::Disconnected).await;
    }

    assert_eq!(h.controller.state(), ConnectionState::Connecting);
    assert_eq!(h.wifi.count(&WifiCall::StartScan), 0);

    h.controller.stop();
    h.controller.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_notification_before_association_times_out() {
    let h = Harness::with_defaults();
    h.start().await;

    let outcome = h.controller.join().await.unwrap();

    assert_eq!(outcome.reason, ExitReason::ConnectTimeout);
    assert!(h.messages().contains(&"Connect timeout".to_string()));
    assert!(h
        .progress
        .lock()
        .unwrap()
        .contains(&("Connect timeout".to_string(), false)));
}

#[tokio::test(start_paused = true)]
async fn test_associated_session_waits_without_watchdog() {
    let h = Harness::with_defaults();
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));
    h.emit(LinkState::Connected).await;

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(h.controller.state(), ConnectionState::Associated);
    h.controller.stop();
    h.controller.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_association_watchdog_ends_silent_session() {
    // Arrange
    let settings = ConnectorSettings {
        association_watchdog: Some(Duration::from_secs(20)),
        ..ConnectorSettings::default()
    };
    let h = Harness::new(MockWifiControl::new(), settings);
    h.start().await;
    h.wifi.set_current_ssid(Some(SSID));
    h.emit(LinkState::Connected).await;

    // Act
    let outcome = h.controller.join().await.unwrap();

    // Assert
    assert_eq!(outcome.reason, ExitReason::Stalled);
    assert!(h.messages().contains(&"Connection stalled".to_string()));
    assert_eq!(h.wifi.count(&WifiCall::Disconnect), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_profile_ends_with_setup_failed() {
    // Arrange
    let wifi = MockWifiControl::new();
    wifi.set_reject_add(true);
    let h = Harness::new(wifi, ConnectorSettings::default());

    // Act
    assert!(h.controller.start());
    let outcome = h.controller.join().await.unwrap();

    // Assert
    assert_eq!(outcome.reason, ExitReason::SetupFailed);
    assert_eq!(outcome.signal, SessionSignal::Finished);
    assert_eq!(
        h.messages(),
        ["Unable to configure uConfig 1234", "Settings restored"]
    );
    assert_eq!(h.wifi.count(&WifiCall::RegisterListener(1)), 0);
    assert_eq!(h.wifi.count(&WifiCall::Reconnect), 1);
}

// ── Start guard and listeners ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_second_start_is_ignored() {
    let h = Harness::with_defaults();

    h.start().await;
    let again = h.controller.start();

    assert!(!again);
    assert_eq!(h.wifi.count(&WifiCall::RegisterListener(1)), 1);
    h.controller.stop();
    h.controller.join().await.unwrap();
    assert_eq!(h.signals(), [SessionSignal::Finished]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_runs_one_session() {
    // Arrange
    let h = Harness::with_defaults();

    // Act
    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.start() })
        })
        .collect();
    let mut started = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            started += 1;
        }
    }
    h.controller.stop();
    h.controller.join().await.unwrap();

    // Assert
    assert_eq!(started, 1);
    assert_eq!(h.signals(), [SessionSignal::Finished]);
    assert_eq!(h.wifi.count(&WifiCall::Reconnect), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleared_progress_listener_receives_nothing_more() {
    let h = Harness::with_defaults();
    h.start().await;

    h.controller.set_progress_listener(None);
    h.wifi.set_current_ssid(Some(SSID));
    h.emit(LinkState::Connected).await;

    assert_eq!(h.messages(), ["Connecting to uConfig 1234..."]);
    assert_eq!(h.signals(), [SessionSignal::Connect]);
    h.controller.stop();
    h.controller.join().await.unwrap();
}
