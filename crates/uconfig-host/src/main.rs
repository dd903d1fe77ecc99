//! `uconfig` - host-side command-line tool for uConfig devices.
//!
//! # Usage
//!
//! ```text
//! uconfig [--config FILE] <COMMAND>
//!
//! Commands:
//!   discover    Listen for device beacons and print the live device list
//!   connect     Join a device's provisioning network, then restore settings
//!   credential  Print the credential derived from a provisioning SSID/BSSID
//!   announce    Broadcast presence beacons (device simulator)
//!   init-config Write the effective configuration to the config file
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable          | Description                                   |
//! |-------------------|-----------------------------------------------|
//! | `UCONFIG_CONFIG`  | Config file path (default: platform dir)      |
//! | `UCONFIG_IFACE`   | Wireless interface used by `connect`          |
//! | `RUST_LOG`        | Log filter; overrides `[logging] level`       |
//!
//! # Architecture overview
//!
//! ```text
//! discover:  UDP socket ─▶ BeaconListener ─▶ DeviceRegistry ◀─ DecayTicker
//!                                                 │
//!                                          watch<DeviceList> ─▶ log
//!
//! connect:   ConnectionController ─▶ WifiControl (nmcli)
//!                  ▲                      │
//!                  └──── LinkEventSink ◀──┘  (nmcli device monitor)
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use uconfig_core::{
    derive_target, encode_beacon, BeaconMessage, NetworkTarget, PresenceBeacon, SessionSignal,
    OPEN_NETWORK_SENTINEL,
};
use uconfig_host::application::connect_network::ConnectionController;
use uconfig_host::application::device_registry::{BeaconObserver, DeviceList, DeviceRegistry};
use uconfig_host::infrastructure::discovery::{spawn_decay_ticker, start_beacon_listener};
use uconfig_host::infrastructure::storage::{
    config_file_path, load_config, load_config_from, save_config_to, AppConfig, ConfigError,
};
use uconfig_host::infrastructure::wifi::{NetworkManagerWifi, StaticPermission};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "uconfig", version, about = "Discover and provision uConfig devices")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, env = "UCONFIG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen for beacons and log every change of the device list.
    Discover {
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Join a provisioning network, then restore the previous setup.
    Connect {
        #[arg(long)]
        ssid: String,

        /// Pre-shared key, or "nopassword" for an open network.
        #[arg(long, default_value = OPEN_NETWORK_SENTINEL)]
        psk: String,

        /// Wireless interface (default: from config, else auto-detect).
        #[arg(long, env = "UCONFIG_IFACE")]
        interface: Option<String>,
    },

    /// Print the credential for a provisioning network.
    Credential {
        #[arg(long)]
        ssid: String,

        #[arg(long)]
        bssid: String,
    },

    /// Broadcast presence beacons like a device would.
    Announce {
        #[arg(long)]
        name: String,

        #[arg(long)]
        id: String,

        #[arg(long, default_value = "/")]
        api: String,

        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Destination port (default: the configured discovery port).
        #[arg(long)]
        port: Option<u16>,

        /// Destination address.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::BROADCAST))]
        target: IpAddr,
    },

    /// Write the effective configuration (defaults merged with any existing
    /// file) to the config path.
    InitConfig {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = read_config(cli.config.as_ref())?;

    // `RUST_LOG` wins; the config file level is the fallback.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Command::Discover { duration } => {
            discover(&config, duration.map(Duration::from_secs)).await
        }
        Command::Connect {
            ssid,
            psk,
            interface,
        } => connect(&config, ssid, &psk, interface).await,
        Command::Credential { ssid, bssid } => credential(&ssid, &bssid),
        Command::Announce {
            name,
            id,
            api,
            interval_ms,
            port,
            target,
        } => {
            let destination = SocketAddr::new(target, port.unwrap_or(config.discovery.port));
            let beacon = PresenceBeacon { api, name, id };
            announce(beacon, destination, Duration::from_millis(interval_ms.max(1))).await
        }
        Command::InitConfig { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => config_file_path().context("no default config location; pass --config")?,
            };
            init_config(&config, &path, force)?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}

fn read_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => load_config_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => match load_config() {
            Ok(config) => Ok(config),
            Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
            Err(e) => Err(e).context("failed to load config"),
        },
    }
}

fn init_config(config: &AppConfig, path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to replace it", path.display());
    }
    save_config_to(path, config)
        .with_context(|| format!("failed to write config to {}", path.display()))
}

// ── discover ──────────────────────────────────────────────────────────────────

async fn discover(config: &AppConfig, duration: Option<Duration>) -> anyhow::Result<()> {
    let discovery = &config.discovery;
    let bind_addr = discovery.bind_addr()?;

    let registry = Arc::new(DeviceRegistry::new(discovery.max_ttl()));
    let observer: Arc<dyn BeaconObserver> = registry.clone();
    let mut listener = start_beacon_listener(bind_addr, discovery.receive_buffer_bytes, observer)
        .context("failed to start beacon listener")?;
    let mut ticker = spawn_decay_ticker(Arc::clone(&registry), discovery.tick_interval())
        .context("failed to start decay ticker")?;

    let mut devices = registry.subscribe();
    let mut scan_error = registry.watch_scan_error();

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("listening for devices on {}.  Press Ctrl-C to exit.", listener.local_addr());

    loop {
        tokio::select! {
            changed = devices.changed() => {
                if changed.is_err() {
                    break;
                }
                let list = devices.borrow_and_update().clone();
                log_device_list(&list);
            }
            changed = scan_error.changed() => {
                if changed.is_ok() && *scan_error.borrow_and_update() {
                    warn!("beacon listener reported an error");
                }
            }
            () = &mut deadline => {
                info!("discovery duration elapsed");
                break;
            }
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    error!("failed to listen for Ctrl+C signal: {e}");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    listener.shutdown();
    ticker.shutdown();
    info!("discovery stopped with {} device(s) live", registry.len());
    Ok(())
}

fn log_device_list(list: &DeviceList) {
    info!("device list #{}: {} device(s)", list.generation, list.len());
    for device in list.iter() {
        info!(
            "  {} at {} (ttl {}, api {})",
            device.display_name(),
            device.address(),
            device.ttl(),
            device.api_location()
        );
    }
}

// ── connect ───────────────────────────────────────────────────────────────────

async fn connect(
    config: &AppConfig,
    ssid: String,
    psk: &str,
    interface: Option<String>,
) -> anyhow::Result<()> {
    let target = NetworkTarget::new(ssid, psk).context("invalid network target")?;
    let interface = interface.or_else(|| config.connector.interface.clone());

    let controller = Arc::new(ConnectionController::new(
        target,
        Arc::new(NetworkManagerWifi::new(interface)),
        Arc::new(StaticPermission::default()),
        config.connector.to_settings(),
    ));

    controller.set_progress_listener(Some(Arc::new(|message: &str, abortable: bool| {
        if abortable {
            info!("{message} (Ctrl-C to abort)");
        } else {
            info!("{message}");
        }
    })));
    controller.set_state_listener(Some(Arc::new(|signal: SessionSignal| {
        info!("session signal: {signal:?}");
    })));

    if !controller.start() {
        anyhow::bail!("connection session did not start");
    }

    // Ctrl-C aborts the session until teardown has begun.
    let stopper = Arc::clone(&controller);
    let mut states = controller.watch_state();
    let ctrl_c = tokio::spawn(async move {
        let signal = tokio::signal::ctrl_c();
        tokio::pin!(signal);
        loop {
            tokio::select! {
                res = &mut signal => {
                    match res {
                        Ok(()) => {
                            info!("received Ctrl+C, restoring network settings");
                            stopper.stop();
                        }
                        Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                    }
                    return;
                }
                changed = states.changed() => {
                    if changed.is_err() || states.borrow_and_update().is_tearing_down() {
                        return;
                    }
                }
            }
        }
    });

    let outcome = controller.join().await;
    ctrl_c.abort();

    match outcome {
        Some(outcome) => {
            info!("session ended: {} ({:?})", outcome.reason, outcome.signal);
            Ok(())
        }
        None => anyhow::bail!("connection session did not complete"),
    }
}

// ── credential ────────────────────────────────────────────────────────────────

fn credential(ssid: &str, bssid: &str) -> anyhow::Result<()> {
    let target = derive_target(ssid, bssid)
        .with_context(|| format!("'{ssid}' is not a uConfig provisioning network"))?;
    println!("ssid: {}", target.ssid());
    println!("psk:  {}", target.credential().as_text());
    Ok(())
}

// ── announce ──────────────────────────────────────────────────────────────────

async fn announce(
    beacon: PresenceBeacon,
    destination: SocketAddr,
    interval: Duration,
) -> anyhow::Result<()> {
    let bind: SocketAddr = match destination {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = tokio::net::UdpSocket::bind(bind)
        .await
        .context("failed to bind announce socket")?;
    socket
        .set_broadcast(true)
        .context("failed to enable broadcast")?;

    let payload = encode_beacon(&BeaconMessage::Presence(beacon));
    let mut ticks = tokio::time::interval(interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("announcing to {destination} every {interval:?}");

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Err(e) = socket.send_to(&payload, destination).await {
                    warn!("announce send failed: {e}");
                }
            }
            _ = &mut ctrl_c => {
                info!("announce stopped");
                return Ok(());
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
