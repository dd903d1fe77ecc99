//! UDP beacon listener.
//!
//! Devices broadcast one JSON object per datagram to the discovery port
//! (default 8003).  The listener binds that port, decodes every datagram with
//! [`decode_beacon`] and hands each successful decode to a single
//! [`BeaconObserver`] together with the sender's IP address.
//!
//! The receive loop runs on a dedicated thread to keep blocking socket I/O
//! away from the Tokio runtime.
//!
//! # How UDP discovery works (for beginners)
//!
//! UDP is connectionless and gives no delivery or ordering guarantee.  Every
//! device periodically sends a beacon to the LAN broadcast address, so a lost
//! datagram is simply replaced by the next one.  The registry turns this
//! unreliable stream into a stable list by resetting a device's TTL on every
//! beacon and evicting it when beacons stop.
//!
//! # Read timeout
//!
//! The socket has a 500 ms read timeout.  `recv_from` therefore returns at
//! least twice a second, which lets the loop notice a shutdown request.
//!
//! # Receive errors
//!
//! Other `recv_from` errors are retried after a backoff that starts at 10 ms
//! and doubles up to the read timeout, so a socket stuck in an error state
//! does not spin a core.  Warnings are throttled to the 1st, 2nd, 4th, 8th ...
//! error of a run.
//!
//! # Oversized datagrams
//!
//! The receive buffer is one byte larger than the configured capacity.  A
//! datagram that fills it is longer than the capacity: it is logged as
//! truncated and decoded from its first `capacity` bytes, which normally
//! fails and drops it.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uconfig_core::decode_beacon;

use crate::application::device_registry::BeaconObserver;
use crate::infrastructure::discovery::DiscoveryError;

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const ERROR_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Handle to a running beacon listener.
///
/// Dropping the handle shuts the listener down.
pub struct BeaconListener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BeaconListener {
    /// Address the socket is bound to (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stops the receive loop and closes the socket.
    ///
    /// Blocks for at most one read timeout.  Idempotent; never reported to
    /// the observer.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        if thread.join().is_err() {
            error!("beacon listener thread panicked");
        }
    }
}

impl Drop for BeaconListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Binds `bind_addr` and spawns the receive thread.
///
/// `capacity` is the largest datagram accepted intact.
///
/// # Errors
///
/// Returns [`DiscoveryError`] if the socket cannot be bound or configured or
/// the thread cannot be spawned.  The same error is reported once through
/// [`BeaconObserver::on_error`]; the listener does not retry.
pub fn start_beacon_listener(
    bind_addr: SocketAddr,
    capacity: usize,
    observer: Arc<dyn BeaconObserver>,
) -> Result<BeaconListener, DiscoveryError> {
    match bind_and_spawn(bind_addr, capacity.max(1), Arc::clone(&observer)) {
        Ok(listener) => {
            info!("beacon listener on UDP {}", listener.local_addr);
            Ok(listener)
        }
        Err(e) => {
            observer.on_error(&e);
            Err(e)
        }
    }
}

fn bind_and_spawn(
    bind_addr: SocketAddr,
    capacity: usize,
    observer: Arc<dyn BeaconObserver>,
) -> Result<BeaconListener, DiscoveryError> {
    let socket = UdpSocket::bind(bind_addr).map_err(|source| DiscoveryError::BindFailed {
        addr: bind_addr,
        source,
    })?;
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(DiscoveryError::Configure)?;
    let local_addr = socket.local_addr().map_err(DiscoveryError::Configure)?;

    let running = Arc::new(AtomicBool::new(true));
    let loop_running = Arc::clone(&running);
    let thread = std::thread::Builder::new()
        .name("uconfig-beacons".to_string())
        .spawn(move || receive_loop(socket, capacity, observer, loop_running))
        .map_err(|source| DiscoveryError::Spawn {
            name: "uconfig-beacons",
            source,
        })?;

    Ok(BeaconListener {
        local_addr,
        running,
        thread: Some(thread),
    })
}

/// The main receive loop executed on the listener thread.
fn receive_loop(
    socket: UdpSocket,
    capacity: usize,
    observer: Arc<dyn BeaconObserver>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; capacity + 1];
    let mut consecutive_errors: u32 = 0;

    while running.load(Ordering::Acquire) {
        let received = socket.recv_from(&mut buf);
        if consecutive_errors > 0 && !matches!(&received, Err(e) if !is_timeout_error(e)) {
            info!("discovery socket recovered after {consecutive_errors} error(s)");
            consecutive_errors = 0;
        }
        let (len, src) = match received {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors.is_power_of_two() {
                    warn!("discovery recv error ({consecutive_errors} in a row): {e}");
                }
                std::thread::sleep(recv_error_backoff(consecutive_errors));
                continue;
            }
        };

        let datagram = if len > capacity {
            warn!("datagram from {src} exceeds {capacity} bytes; truncated");
            &buf[..capacity]
        } else {
            &buf[..len]
        };

        match decode_beacon(datagram) {
            Ok(message) => observer.on_beacon(src.ip().to_canonical(), message),
            Err(e) => debug!("dropped datagram from {src}: {e}"),
        }
    }

    info!("beacon listener stopped");
}

/// Pause before retrying after the `consecutive`-th receive error in a row.
fn recv_error_backoff(consecutive: u32) -> Duration {
    let exponent = consecutive.saturating_sub(1).min(16);
    ERROR_BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(READ_TIMEOUT)
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Mutex;
    use uconfig_core::BeaconMessage;

    #[derive(Default)]
    struct RecordingObserver {
        beacons: Mutex<Vec<(IpAddr, BeaconMessage)>>,
        errors: Mutex<Vec<String>>,
    }

    impl BeaconObserver for RecordingObserver {
        fn on_beacon(&self, source: IpAddr, message: BeaconMessage) {
            self.beacons.lock().unwrap().push((source, message));
        }

        fn on_error(&self, error: &(dyn std::error::Error + 'static)) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn test_recv_error_backoff_doubles_then_caps() {
        assert_eq!(recv_error_backoff(1), Duration::from_millis(10));
        assert_eq!(recv_error_backoff(2), Duration::from_millis(20));
        assert_eq!(recv_error_backoff(4), Duration::from_millis(80));
        assert_eq!(recv_error_backoff(7), READ_TIMEOUT);
        assert_eq!(recv_error_backoff(u32::MAX), READ_TIMEOUT);
    }

    #[test]
    fn test_recv_error_backoff_never_spins() {
        assert!((1..=100).all(|n| recv_error_backoff(n) >= ERROR_BACKOFF_BASE));
    }

    #[test]
    fn test_is_timeout_error_recognises_timed_out() {
        // Arrange
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");

        // Act / Assert
        assert!(is_timeout_error(&e));
    }

    #[test]
    fn test_is_timeout_error_recognises_would_block() {
        let e = std::io::Error::new(std::io::ErrorKind::WouldBlock, "would block");
        assert!(is_timeout_error(&e));
    }

    #[test]
    fn test_is_timeout_error_returns_false_for_other_errors() {
        let e = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_timeout_error(&e));
    }

    #[test]
    fn test_bind_failure_is_reported_once_to_observer() {
        // Arrange: occupy a port so the listener cannot bind it
        let occupied = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let addr = occupied.local_addr().unwrap();
        let observer = Arc::new(RecordingObserver::default());

        // Act
        let result = start_beacon_listener(addr, 256, observer.clone());

        // Assert
        assert!(matches!(result, Err(DiscoveryError::BindFailed { .. })));
        assert_eq!(observer.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_silent() {
        let observer = Arc::new(RecordingObserver::default());
        let mut listener =
            start_beacon_listener("127.0.0.1:0".parse().unwrap(), 256, observer.clone())
                .expect("listener must bind");
        assert!(listener.is_running());

        listener.shutdown();
        listener.shutdown();

        assert!(!listener.is_running());
        assert!(observer.errors.lock().unwrap().is_empty());
    }
}
