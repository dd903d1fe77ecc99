//! ConnectionController: joins a device's provisioning network and restores
//! the previous network setup afterwards.
//!
//! The controller drives a small state machine on one Tokio task:
//!
//! 1. **Setup** – find a saved profile for the SSID or create an ephemeral
//!    one, disconnect from the active network and let the platform settle.
//! 2. **Associate** – subscribe to link notifications and request
//!    association with the target profile.
//! 3. **Event loop** – consume one link notification at a time, with a
//!    bounded wait, until the session ends.
//! 4. **Teardown** – runs exactly once on every exit path: unsubscribe,
//!    disconnect, remove the ephemeral profile, re-enable auto-connect and
//!    report a terminal signal.
//!
//! # Cancellation (for beginners)
//!
//! [`ConnectionController::stop`] never touches the notification queue.  It
//! sets a dedicated flag and wakes the worker through a `tokio::sync::Notify`.
//! The worker checks the flag before every wait, so a genuine `UNKNOWN` link
//! notification can never be mistaken for a stop request.  `stop()` returns
//! immediately; completion is the terminal [`SessionSignal`] (or the result
//! of [`ConnectionController::join`]).
//!
//! # Platform access
//!
//! Everything platform-specific goes through the [`WifiControl`] and
//! [`PermissionProbe`] traits.  Platform requests are `async` and are awaited
//! on the controller's task, so a slow backend suspends only its own session.
//! A stop requested while a request is in flight is honoured as soon as that
//! request returns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uconfig_core::{ConnectionState, Credential, LinkState, NetworkTarget, SessionSignal};

/// Platform identifier of a saved network profile.
pub type NetworkId = u32;

/// Platform identifier of a link-notification registration.
pub type ListenerToken = u64;

/// Error type for Wi-Fi platform operations.
#[derive(Debug, Error)]
pub enum WifiError {
    /// The platform refused the request.
    #[error("request rejected by the network backend: {0}")]
    Rejected(String),

    /// The platform's network service could not be reached.
    #[error("network backend unavailable")]
    Unavailable(#[source] std::io::Error),

    /// The platform answered with something that could not be understood.
    #[error("unexpected network backend output: {0}")]
    Parse(String),
}

/// Platform network-configuration authority.
///
/// Each supported platform provides an implementation in the infrastructure
/// layer.
#[async_trait]
pub trait WifiControl: Send + Sync {
    /// Looks up a saved profile whose SSID is exactly `ssid`.
    async fn find_saved_network(&self, ssid: &str) -> Result<Option<NetworkId>, WifiError>;

    /// Creates a profile for `ssid`.
    async fn add_network(&self, ssid: &str, credential: &Credential)
        -> Result<NetworkId, WifiError>;

    /// Disconnects from the active network.
    async fn disconnect(&self) -> Result<(), WifiError>;

    /// Requests association with a profile.
    async fn enable_network(&self, id: NetworkId) -> Result<(), WifiError>;

    /// Stops the platform from auto-connecting to a profile.
    async fn disable_network(&self, id: NetworkId) -> Result<(), WifiError>;

    async fn remove_network(&self, id: NetworkId) -> Result<(), WifiError>;

    /// Resumes the platform's normal auto-connect behaviour.
    async fn reconnect(&self) -> Result<(), WifiError>;

    /// SSID of the network the platform is currently associated with.
    async fn current_ssid(&self) -> Option<String>;

    /// SSIDs seen in the most recent scan.
    async fn visible_ssids(&self) -> Vec<String>;

    /// Triggers an active scan.
    async fn start_scan(&self) -> Result<(), WifiError>;

    /// Starts delivering link notifications to `sink`.
    async fn register_link_listener(&self, sink: LinkEventSink)
        -> Result<ListenerToken, WifiError>;

    /// Stops delivering link notifications for `token`.
    ///
    /// Called from `Drop`, so it must not block.
    fn unregister_link_listener(&self, token: ListenerToken);
}

/// Capability check for the network-info permission.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionProbe: Send + Sync {
    fn network_info_granted(&self) -> bool;
}

/// Producer end of a controller's link-notification queue.
///
/// Handed to [`WifiControl::register_link_listener`].  The queue is bounded;
/// a notification that does not fit is dropped with a warning.
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    tx: mpsc::Sender<LinkState>,
}

impl LinkEventSink {
    pub fn new(tx: mpsc::Sender<LinkState>) -> Self {
        Self { tx }
    }

    /// Enqueues a notification.  Returns `false` if it was dropped.
    pub fn notify(&self, state: LinkState) -> bool {
        match self.tx.try_send(state) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(state)) => {
                warn!("link notification queue full; dropped {state:?}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// `true` once the controller has released its subscription.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Timing and sizing of a connection session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    /// Pause between disconnecting and requesting association.
    pub settle_delay: Duration,
    /// Longest wait for a link notification before association.
    pub event_timeout: Duration,
    /// Consecutive scan misses that end the session.
    pub max_scan_misses: u32,
    /// Longest silence tolerated once associated (`None` waits forever).
    pub association_watchdog: Option<Duration>,
    /// Capacity of the link-notification queue.
    pub queue_capacity: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            event_timeout: Duration::from_secs(45),
            max_scan_misses: 3,
            association_watchdog: None,
            queue_capacity: 32,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// `stop()` was called.
    Stopped,
    /// No link notification arrived in time before the first association.
    ConnectTimeout,
    /// The target stopped showing up in scans.
    NetworkGone,
    /// The network-info permission was missing at `CONNECTED`.
    NoPermission,
    /// No link notification arrived within the association watchdog.
    Stalled,
    /// The target profile could not be prepared.
    SetupFailed,
    /// The platform stopped delivering link notifications.
    NotificationsClosed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Stopped => "stopped",
            Self::ConnectTimeout => "connect timeout",
            Self::NetworkGone => "network gone",
            Self::NoPermission => "no permission",
            Self::Stalled => "connection stalled",
            Self::SetupFailed => "setup failed",
            Self::NotificationsClosed => "link notifications closed",
        };
        f.write_str(text)
    }
}

/// Result of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The terminal signal that was reported.
    pub signal: SessionSignal,
    pub reason: ExitReason,
}

/// Callback for progress messages: `(message, abortable)`.
pub type ProgressListener = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Callback for session signals.
pub type StateListener = Arc<dyn Fn(SessionSignal) + Send + Sync>;

// ── Controller ────────────────────────────────────────────────────────────────

struct Shared {
    target: NetworkTarget,
    wifi: Arc<dyn WifiControl>,
    permission: Arc<dyn PermissionProbe>,
    settings: ConnectorSettings,
    started: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
    state: watch::Sender<ConnectionState>,
    progress_listener: Mutex<Option<ProgressListener>>,
    state_listener: Mutex<Option<StateListener>>,
}

impl Shared {
    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("{}: {previous:?} -> {state:?}", self.target.ssid());
        }
    }

    fn progress(&self, message: &str, abortable: bool) {
        info!("{message}");
        let listener = lock(&self.progress_listener).clone();
        if let Some(listener) = listener {
            listener(message, abortable);
        }
    }

    fn emit(&self, signal: SessionSignal) {
        info!("{}: {signal:?}", self.target.ssid());
        let listener = lock(&self.state_listener).clone();
        if let Some(listener) = listener {
            listener(signal);
        }
    }
}

/// Drives one connection session to one target network.
///
/// A controller runs at most one session.  Dropping it requests a stop; the
/// session still tears down on its task.
pub struct ConnectionController {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<SessionOutcome>>>,
}

impl ConnectionController {
    pub fn new(
        target: NetworkTarget,
        wifi: Arc<dyn WifiControl>,
        permission: Arc<dyn PermissionProbe>,
        settings: ConnectorSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared {
                target,
                wifi,
                permission,
                settings,
                started: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                state,
                progress_listener: Mutex::new(None),
                state_listener: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &NetworkTarget {
        &self.shared.target
    }

    /// Starts the session on the current Tokio runtime.
    ///
    /// Only the first call starts anything; later calls (including
    /// concurrent ones) return `false`.  Also returns `false` when called
    /// outside a Tokio runtime.
    pub fn start(&self) -> bool {
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{}: start() ignored, already started", self.shared.target.ssid());
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("cannot start connection session outside a Tokio runtime: {e}");
                self.shared.started.store(false, Ordering::Release);
                return false;
            }
        };

        let handle = runtime.spawn(run_session(Arc::clone(&self.shared)));
        *lock(&self.worker) = Some(handle);
        true
    }

    /// Requests the session to end.
    ///
    /// Idempotent and callable from any thread at any time, including before
    /// `start()` or while setup is still running.
    pub fn stop(&self) {
        if !self.shared.stop_requested.swap(true, Ordering::AcqRel) {
            info!("{}: stop requested", self.shared.target.ssid());
        }
        self.shared.wake.notify_one();
    }

    /// Replaces (or clears) the progress listener.
    pub fn set_progress_listener(&self, listener: Option<ProgressListener>) {
        *lock(&self.shared.progress_listener) = listener;
    }

    /// Replaces (or clears) the state listener.
    pub fn set_state_listener(&self, listener: Option<StateListener>) {
        *lock(&self.shared.state_listener) = listener;
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Follows the controller state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Waits for the session to finish.
    ///
    /// Returns `None` if the session was never started, was already joined,
    /// or its task panicked.
    pub async fn join(&self) -> Option<SessionOutcome> {
        let handle = lock(&self.worker).take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("connection session task failed: {e}");
                None
            }
        }
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if self.shared.started.load(Ordering::Acquire) {
            self.stop();
        }
    }
}

// ── Session worker ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct SessionProfile {
    id: NetworkId,
    /// Created by this session, so teardown removes it.
    ephemeral: bool,
}

/// Link-notification registration, released exactly once.
struct LinkSubscription {
    wifi: Arc<dyn WifiControl>,
    token: Option<ListenerToken>,
}

impl LinkSubscription {
    async fn register(wifi: Arc<dyn WifiControl>, sink: LinkEventSink) -> Result<Self, WifiError> {
        let token = wifi.register_link_listener(sink).await?;
        Ok(Self {
            wifi,
            token: Some(token),
        })
    }

    fn release(&mut self) {
        if let Some(token) = self.token.take() {
            self.wifi.unregister_link_listener(token);
        }
    }
}

impl Drop for LinkSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

enum Wait {
    Event(LinkState),
    TimedOut,
    Closed,
}

async fn next_event(events: &mut mpsc::Receiver<LinkState>, limit: Option<Duration>) -> Wait {
    let received = match limit {
        Some(limit) => match tokio::time::timeout(limit, events.recv()).await {
            Ok(received) => received,
            Err(_) => return Wait::TimedOut,
        },
        None => events.recv().await,
    };
    match received {
        Some(state) => Wait::Event(state),
        None => Wait::Closed,
    }
}

async fn run_session(shared: Arc<Shared>) -> SessionOutcome {
    let mut session = Session {
        shared,
        profile: None,
        subscription: None,
        scan_misses: 0,
    };
    let reason = session.run().await;
    session.teardown(reason).await
}

struct Session {
    shared: Arc<Shared>,
    profile: Option<SessionProfile>,
    subscription: Option<LinkSubscription>,
    scan_misses: u32,
}

impl Session {
    async fn run(&mut self) -> ExitReason {
        let shared = Arc::clone(&self.shared);
        let ssid = shared.target.ssid();

        if shared.stop_requested() {
            return ExitReason::Stopped;
        }

        // ── Setup ──
        let profile = match self.prepare_profile().await {
            Ok(profile) => profile,
            Err(e) => {
                error!("{ssid}: cannot prepare network profile: {e}");
                shared.progress(&format!("Unable to configure {ssid}"), false);
                return ExitReason::SetupFailed;
            }
        };
        self.profile = Some(profile);
        if shared.stop_requested() {
            return ExitReason::Stopped;
        }

        if let Err(e) = shared.wifi.disconnect().await {
            warn!("{ssid}: disconnect before association failed: {e}");
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.settings.settle_delay) => {}
            _ = shared.wake.notified() => {}
        }
        if shared.stop_requested() {
            return ExitReason::Stopped;
        }

        // ── Associate ──
        let (tx, mut events) = mpsc::channel(shared.settings.queue_capacity.max(1));
        let sink = LinkEventSink::new(tx);
        match LinkSubscription::register(Arc::clone(&shared.wifi), sink).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                error!("{ssid}: cannot subscribe to link notifications: {e}");
                shared.progress(&format!("Unable to configure {ssid}"), false);
                return ExitReason::SetupFailed;
            }
        }
        self.request_association().await;
        shared.set_state(ConnectionState::Connecting);
        shared.progress(&format!("Connecting to {ssid}..."), true);

        // ── Event loop ──
        loop {
            if shared.stop_requested() {
                return ExitReason::Stopped;
            }

            let associated = shared.state().is_associated();
            let limit = if associated {
                shared.settings.association_watchdog
            } else {
                Some(shared.settings.event_timeout)
            };

            let wait = tokio::select! {
                _ = shared.wake.notified() => continue,
                wait = next_event(&mut events, limit) => wait,
            };

            match wait {
                Wait::TimedOut if associated => {
                    shared.progress("Connection stalled", false);
                    return ExitReason::Stalled;
                }
                Wait::TimedOut => {
                    shared.progress("Connect timeout", false);
                    return ExitReason::ConnectTimeout;
                }
                Wait::Closed => {
                    warn!("{ssid}: link notifications ended unexpectedly");
                    shared.progress("Connection lost", false);
                    return ExitReason::NotificationsClosed;
                }
                Wait::Event(state) => {
                    if let Some(reason) = self.handle_link_state(state).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn prepare_profile(&self) -> Result<SessionProfile, WifiError> {
        let target = &self.shared.target;
        if let Some(id) = self.shared.wifi.find_saved_network(target.ssid()).await? {
            debug!("{}: using saved profile {id}", target.ssid());
            return Ok(SessionProfile {
                id,
                ephemeral: false,
            });
        }
        info!("{}: adding temporary network profile", target.ssid());
        let id = self
            .shared
            .wifi
            .add_network(target.ssid(), target.credential())
            .await?;
        Ok(SessionProfile {
            id,
            ephemeral: true,
        })
    }

    async fn request_association(&self) {
        let Some(profile) = self.profile else {
            return;
        };
        if let Err(e) = self.shared.wifi.enable_network(profile.id).await {
            warn!("{}: association request failed: {e}", self.shared.target.ssid());
        }
    }

    async fn on_target(&self) -> bool {
        self.shared.wifi.current_ssid().await.as_deref() == Some(self.shared.target.ssid())
    }

    /// Applies one link notification.  Returns an exit reason to end the session.
    async fn handle_link_state(&mut self, link: LinkState) -> Option<ExitReason> {
        let shared = Arc::clone(&self.shared);
        let associated = shared.state().is_associated();
        debug!("{}: link {link:?} while {:?}", shared.target.ssid(), shared.state());

        match link {
            LinkState::Connecting => None,

            LinkState::Connected => {
                if !shared.permission.network_info_granted() {
                    warn!("network-info permission not granted");
                    return Some(ExitReason::NoPermission);
                }
                if self.on_target().await {
                    shared.set_state(ConnectionState::Associated);
                    shared.emit(SessionSignal::Connect);
                    self.scan_misses = 0;
                    shared.progress("Connected!", true);
                } else {
                    shared.progress("Connect fail, retrying", true);
                    if associated {
                        shared.emit(SessionSignal::Disconnect);
                    }
                    self.request_association().await;
                    shared.set_state(ConnectionState::Connecting);
                }
                None
            }

            LinkState::Disconnecting | LinkState::Disconnected => {
                if associated {
                    shared.emit(SessionSignal::Disconnect);
                    self.request_association().await;
                    shared.set_state(ConnectionState::Connecting);
                    shared.progress("Reconnecting", true);
                } else if self.on_target().await {
                    let ssid = shared.target.ssid();
                    let alive = shared.wifi.visible_ssids().await.iter().any(|s| s == ssid);
                    if !alive {
                        self.scan_misses += 1;
                        debug!("{ssid}: missing from scan ({} in a row)", self.scan_misses);
                        if let Err(e) = shared.wifi.start_scan().await {
                            warn!("{ssid}: scan request failed: {e}");
                        }
                    }
                    if self.scan_misses >= shared.settings.max_scan_misses {
                        shared.progress("Network gone", false);
                        return Some(ExitReason::NetworkGone);
                    }
                }
                None
            }

            LinkState::Suspended | LinkState::Unknown => None,
        }
    }

    /// Restores the platform's network setup.  Consumes the session so it
    /// can only run once.
    async fn teardown(mut self, reason: ExitReason) -> SessionOutcome {
        let shared = Arc::clone(&self.shared);
        let ssid = shared.target.ssid();
        info!("{ssid}: ending session ({reason})");

        if let Some(mut subscription) = self.subscription.take() {
            subscription.release();
        }

        let was_associated = shared.state().is_associated();
        shared.set_state(ConnectionState::Disconnecting);
        if was_associated {
            if let Err(e) = shared.wifi.disconnect().await {
                warn!("{ssid}: disconnect failed: {e}");
            }
        }

        shared.set_state(ConnectionState::Restoring);
        if let Some(profile) = self.profile.filter(|p| p.ephemeral) {
            if let Err(e) = shared.wifi.disable_network(profile.id).await {
                warn!("{ssid}: disabling temporary profile failed: {e}");
            }
            if let Err(e) = shared.wifi.remove_network(profile.id).await {
                warn!("{ssid}: removing temporary profile failed: {e}");
            }
        }
        if let Err(e) = shared.wifi.reconnect().await {
            warn!("{ssid}: re-enabling auto-connect failed: {e}");
        }

        let signal = if reason == ExitReason::NoPermission || !shared.permission.network_info_granted()
        {
            SessionSignal::NoPermission
        } else {
            SessionSignal::Finished
        };
        shared.set_state(ConnectionState::Terminated);
        shared.emit(signal);
        shared.progress("Settings restored", false);

        SessionOutcome { signal, reason }
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
