//! DeviceRegistry: the decaying presence cache of live devices.
//!
//! The registry is fed by the beacon listener (through [`BeaconObserver`])
//! and by the decay ticker (through [`DeviceRegistry::tick`]).  It owns one
//! [`Device`] per network address.
//!
//! # Concurrency model (for beginners)
//!
//! Three threads touch the registry: the listener's receive loop, the decay
//! ticker and whoever reads the device list (a CLI loop, a UI, a test).
//!
//! - The collection itself lives behind one `std::sync::Mutex`.  Writers hold
//!   it only for the duration of a single mutation.
//! - Readers never take that lock.  Every mutation that changes the set of
//!   devices builds a brand-new immutable [`DeviceList`] and publishes it
//!   through a `tokio::sync::watch` channel.  A reader holds an `Arc` to one
//!   complete list, either the one from before a mutation or the one after,
//!   never a half-updated one.
//! - Each device's TTL has its own watch channel, so a reader can follow the
//!   countdown of one device without re-reading the whole list.
//! - Broadcast subscribers are called outside the registry lock, so a slow
//!   subscriber never delays beacons from other devices.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uconfig_core::{api_location, display_name, BeaconMessage, Ttl, Value, MAX_TTL};

/// Handle returned by [`Device::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

/// Receives value broadcasts of one device.
///
/// Implementations are called on the listener thread and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait BroadcastSubscriber: Send + Sync {
    fn on_broadcast(&self, device: IpAddr, name: &str, value: &Value);
}

/// Consumer of decoded discovery datagrams.
///
/// The beacon listener forwards every successfully decoded datagram through
/// `on_beacon`, and reports a fatal listener failure exactly once through
/// `on_error`.
pub trait BeaconObserver: Send + Sync {
    fn on_beacon(&self, source: IpAddr, message: BeaconMessage);

    fn on_error(&self, error: &(dyn std::error::Error + 'static));
}

// ── Device ────────────────────────────────────────────────────────────────────

/// A live device, keyed by its network address.
pub struct Device {
    address: IpAddr,
    name: String,
    id: String,
    display_name: String,
    api: String,
    ttl: watch::Sender<Ttl>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<dyn BroadcastSubscriber>)>>,
    next_subscription: AtomicU64,
}

impl Device {
    fn new(address: IpAddr, api: &str, name: &str, id: &str, max_ttl: u16) -> Self {
        let (ttl, _) = watch::channel(Ttl::new(max_ttl));
        Self {
            address,
            name: name.to_string(),
            id: id.to_string(),
            display_name: display_name(name, id),
            api: api.to_string(),
            ttl,
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `"<name> (<id>)"`.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// API path as announced by the device.
    pub fn api(&self) -> &str {
        &self.api
    }

    /// Base URL of the device's HTTP API.
    pub fn api_location(&self) -> String {
        api_location(self.address, &self.api)
    }

    /// Remaining lifetime in ticks.
    pub fn ttl(&self) -> u16 {
        self.ttl.borrow().remaining()
    }

    /// Follows the TTL; the receiver is notified on every tick and touch.
    pub fn watch_ttl(&self) -> watch::Receiver<Ttl> {
        self.ttl.subscribe()
    }

    /// Registers a subscriber for this device's value broadcasts.
    pub fn subscribe(&self, subscriber: Arc<dyn BroadcastSubscriber>) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push((id, subscriber));
        id
    }

    /// Removes a subscriber.  Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn touch(&self) {
        self.ttl.send_modify(Ttl::touch);
    }

    /// Returns `true` when the device expired on this tick.
    fn tick(&self) -> bool {
        let mut expired = false;
        self.ttl.send_modify(|ttl| expired = ttl.tick());
        expired
    }

    fn dispatch(&self, name: &str, value: &Value) {
        // Copy the list so subscribers may (un)subscribe from inside the callback.
        let subscribers: Vec<Arc<dyn BroadcastSubscriber>> = lock(&self.subscribers)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber.on_broadcast(self.address, name, value);
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("display_name", &self.display_name)
            .field("api", &self.api)
            .field("ttl", &self.ttl())
            .finish_non_exhaustive()
    }
}

// ── DeviceList ────────────────────────────────────────────────────────────────

/// An immutable snapshot of the registry, in order of first appearance.
///
/// `generation` increases by one with every publication.
#[derive(Debug, Clone)]
pub struct DeviceList {
    pub generation: u64,
    pub devices: Arc<[Arc<Device>]>,
}

impl DeviceList {
    fn empty() -> Self {
        Self {
            generation: 0,
            devices: Arc::from(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.iter()
    }

    pub fn find(&self, address: IpAddr) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.address == address)
    }
}

// ── DeviceRegistry ────────────────────────────────────────────────────────────

struct RegistryState {
    devices: Vec<Arc<Device>>,
    generation: u64,
}

/// In-memory registry of live devices.
///
/// Shared as `Arc<DeviceRegistry>` between the listener thread, the decay
/// ticker thread and readers.  No operation fails; anomalies are logged.
pub struct DeviceRegistry {
    max_ttl: u16,
    state: Mutex<RegistryState>,
    list: watch::Sender<DeviceList>,
    scan_error: watch::Sender<bool>,
}

impl DeviceRegistry {
    /// Creates an empty registry whose devices live for `max_ttl` ticks.
    pub fn new(max_ttl: u16) -> Self {
        let (list, _) = watch::channel(DeviceList::empty());
        let (scan_error, _) = watch::channel(false);
        Self {
            max_ttl: max_ttl.max(1),
            state: Mutex::new(RegistryState {
                devices: Vec::new(),
                generation: 0,
            }),
            list,
            scan_error,
        }
    }

    pub fn max_ttl(&self) -> u16 {
        self.max_ttl
    }

    /// Applies a presence beacon from `address`.
    ///
    /// A known device is touched (TTL back to max, no publication).  An
    /// unknown one is created, appended and published.  Returns `true` when a
    /// new device was created.
    pub fn on_presence(&self, address: IpAddr, api: &str, name: &str, id: &str) -> bool {
        let mut state = lock(&self.state);

        if let Some(device) = state.devices.iter().find(|d| d.address == address) {
            device.touch();
            return false;
        }

        let device = Arc::new(Device::new(address, api, name, id, self.max_ttl));
        info!(
            "device discovered: {} at {}",
            device.display_name(),
            device.api_location()
        );
        state.devices.push(device);
        self.publish(&mut state);
        true
    }

    /// Forwards a value broadcast to the subscribers of the device at `address`.
    ///
    /// Returns `false` (after logging) when no device is known at `address`.
    pub fn on_broadcast(&self, address: IpAddr, name: &str, value: &Value) -> bool {
        let device = {
            let state = lock(&self.state);
            state
                .devices
                .iter()
                .find(|d| d.address == address)
                .map(Arc::clone)
        };

        match device {
            Some(device) => {
                device.dispatch(name, value);
                true
            }
            None => {
                warn!("broadcast {name}={value} from unknown device {address}; dropped");
                false
            }
        }
    }

    /// Advances every device's TTL by one tick and evicts expired devices.
    ///
    /// Publishes at most one new list, and only when something was removed.
    /// Returns the number of evicted devices.
    pub fn tick(&self) -> usize {
        let mut state = lock(&self.state);

        let before = state.devices.len();
        state.devices.retain(|device| {
            let expired = device.tick();
            if expired {
                info!("device expired: {} ({})", device.display_name(), device.address);
            }
            !expired
        });
        let removed = before - state.devices.len();

        if removed > 0 {
            self.publish(&mut state);
        }
        removed
    }

    /// Follows the device list.  The receiver starts at the current list.
    pub fn subscribe(&self) -> watch::Receiver<DeviceList> {
        self.list.subscribe()
    }

    /// The most recently published device list.
    pub fn snapshot(&self) -> DeviceList {
        self.list.borrow().clone()
    }

    pub fn get(&self, address: IpAddr) -> Option<Arc<Device>> {
        self.snapshot().find(address).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follows the "scan error" flag, raised when the listener fails.
    pub fn watch_scan_error(&self) -> watch::Receiver<bool> {
        self.scan_error.subscribe()
    }

    pub fn has_scan_error(&self) -> bool {
        *self.scan_error.borrow()
    }

    /// Clears the scan error flag, e.g. after a listener was restarted.
    pub fn clear_scan_error(&self) {
        self.scan_error.send_replace(false);
    }

    /// Called with the state lock held so publications are totally ordered.
    fn publish(&self, state: &mut MutexGuard<'_, RegistryState>) {
        state.generation += 1;
        let list = DeviceList {
            generation: state.generation,
            devices: Arc::from(state.devices.clone()),
        };
        debug!(
            "publishing device list generation {} ({} devices)",
            list.generation,
            list.len()
        );
        self.list.send_replace(list);
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(MAX_TTL)
    }
}

impl BeaconObserver for DeviceRegistry {
    fn on_beacon(&self, source: IpAddr, message: BeaconMessage) {
        match message {
            BeaconMessage::Presence(p) => {
                self.on_presence(source, &p.api, &p.name, &p.id);
            }
            BeaconMessage::Broadcast(d) => {
                self.on_broadcast(source, &d.name, &d.value);
            }
        }
    }

    fn on_error(&self, error: &(dyn std::error::Error + 'static)) {
        error!("discovery listener failed: {error}");
        self.scan_error.send_replace(true);
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
