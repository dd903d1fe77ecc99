//! Fixed-interval decay of the device registry.
//!
//! The ticker calls [`DeviceRegistry::tick`] every `interval` from its own
//! thread.  Deadlines are computed from the previous deadline, not from the
//! end of the previous tick, so a slow tick does not stretch device lifetimes.
//! If the thread falls more than one interval behind it skips the missed
//! ticks instead of firing them back to back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::application::device_registry::DeviceRegistry;
use crate::infrastructure::discovery::DiscoveryError;

/// Handle to a running decay ticker.  Dropping it stops the ticker.
pub struct DecayTicker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DecayTicker {
    /// Stops the ticker and waits for its thread.  Idempotent.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        thread.thread().unpark();
        if thread.join().is_err() {
            error!("decay ticker thread panicked");
        }
    }
}

impl Drop for DecayTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns the ticker thread.
///
/// # Errors
///
/// Returns [`DiscoveryError::Spawn`] if the thread cannot be started.
pub fn spawn_decay_ticker(
    registry: Arc<DeviceRegistry>,
    interval: Duration,
) -> Result<DecayTicker, DiscoveryError> {
    let interval = interval.max(Duration::from_millis(1));
    let running = Arc::new(AtomicBool::new(true));
    let loop_running = Arc::clone(&running);

    let thread = std::thread::Builder::new()
        .name("uconfig-decay".to_string())
        .spawn(move || tick_loop(&registry, interval, &loop_running))
        .map_err(|source| DiscoveryError::Spawn {
            name: "uconfig-decay",
            source,
        })?;

    info!("decay ticker running every {interval:?}");
    Ok(DecayTicker {
        running,
        thread: Some(thread),
    })
}

fn tick_loop(registry: &DeviceRegistry, interval: Duration, running: &AtomicBool) {
    let mut deadline = Instant::now() + interval;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < deadline {
            // Wakes early on unpark() from shutdown; the loop re-checks.
            std::thread::park_timeout(deadline - now);
            continue;
        }

        let removed = registry.tick();
        if removed > 0 {
            debug!("decay tick evicted {removed} device(s)");
        }

        deadline += interval;
        if deadline <= now {
            deadline = now + interval;
        }
    }

    info!("decay ticker stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
