//! NetworkManager backend, driven through `nmcli`.
//!
//! Every [`WifiControl`] request maps to one or two `nmcli` invocations:
//!
//! | Request              | Command                                                  |
//! |----------------------|----------------------------------------------------------|
//! | `find_saved_network` | `connection show`, then `802-11-wireless.ssid` per entry |
//! | `add_network`        | `connection add type wifi ... autoconnect no`            |
//! | `disconnect`         | `device disconnect <if>`                                 |
//! | `enable_network`     | `-w 0 connection up uuid <uuid> [passwd-file /dev/stdin]`|
//! | `disable_network`    | `connection modify uuid <uuid> connection.autoconnect no`|
//! | `remove_network`     | `connection delete uuid <uuid>`                          |
//! | `reconnect`          | `-w 0 device connect <if>`                               |
//! | `current_ssid`       | `device wifi list --rescan no` (ACTIVE row)              |
//! | `start_scan`         | `device wifi rescan`                                     |
//!
//! Commands run through `tokio::process`, so a slow `nmcli` suspends only the
//! session awaiting it.  Link notifications come from a
//! `nmcli device monitor <if>` child whose output is read line by line on a
//! Tokio task.
//!
//! # Pre-shared keys
//!
//! A key never appears on a command line, where any local user could read it
//! from the process table.  Profiles this backend creates are marked
//! `psk-flags 2` (not saved), and the key is written to `nmcli`'s stdin as a
//! `passwd-file` entry each time the profile is brought up.
//!
//! NetworkManager identifies profiles by UUID; the backend hands out small
//! [`NetworkId`]s and keeps the mapping.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uconfig_core::{Credential, LinkState};

use crate::application::connect_network::{
    LinkEventSink, ListenerToken, NetworkId, WifiControl, WifiError,
};

const NMCLI: &str = "nmcli";

/// Secret name NetworkManager expects in a `passwd-file` for WPA-PSK.
const PSK_SECRET: &str = "802-11-wireless-security.psk";

/// A running `nmcli device monitor` and the task reading its output.
struct Monitor {
    child: Child,
    reader: JoinHandle<()>,
}

impl Monitor {
    fn stop(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("link monitor already exited: {e}");
        }
        self.reader.abort();
    }
}

/// [`WifiControl`] implementation for Linux hosts running NetworkManager.
pub struct NetworkManagerWifi {
    interface: Option<String>,
    profiles: Mutex<HashMap<NetworkId, String>>,
    /// Keys of the profiles this backend created, supplied on activation.
    secrets: Mutex<HashMap<NetworkId, String>>,
    monitors: Mutex<HashMap<ListenerToken, Monitor>>,
    next_network: AtomicU32,
    next_token: AtomicU64,
}

impl NetworkManagerWifi {
    /// Creates a backend for `interface`, or for the first Wi-Fi device
    /// NetworkManager reports when `None`.
    pub fn new(interface: Option<String>) -> Self {
        Self {
            interface,
            profiles: Mutex::new(HashMap::new()),
            secrets: Mutex::new(HashMap::new()),
            monitors: Mutex::new(HashMap::new()),
            next_network: AtomicU32::new(0),
            next_token: AtomicU64::new(0),
        }
    }

    /// Runs `nmcli` and returns its stdout.
    async fn nmcli(&self, args: &[&str]) -> Result<String, WifiError> {
        self.nmcli_with_input(args, None).await
    }

    /// Runs `nmcli`, writing `input` to its stdin when given.
    async fn nmcli_with_input(
        &self,
        args: &[&str],
        input: Option<&str>,
    ) -> Result<String, WifiError> {
        debug!("{NMCLI} {}", args.join(" "));
        let mut child = Command::new(NMCLI)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WifiError::Unavailable)?;
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(WifiError::Unavailable)?;
        }
        let output = child.wait_with_output().await.map_err(WifiError::Unavailable)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(WifiError::Rejected(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn interface(&self) -> Result<String, WifiError> {
        if let Some(interface) = &self.interface {
            return Ok(interface.clone());
        }
        let listing = self.nmcli(&["-t", "-f", "DEVICE,TYPE", "device"]).await?;
        listing
            .lines()
            .map(split_terse)
            .find(|fields| fields.get(1).map(String::as_str) == Some("wifi"))
            .and_then(|fields| fields.into_iter().next())
            .ok_or_else(|| WifiError::Parse("no Wi-Fi device found".to_string()))
    }

    fn register_profile(&self, uuid: String) -> NetworkId {
        let mut profiles = lock(&self.profiles);
        if let Some((id, _)) = profiles.iter().find(|(_, u)| **u == uuid) {
            return *id;
        }
        let id = self.next_network.fetch_add(1, Ordering::Relaxed) + 1;
        profiles.insert(id, uuid);
        id
    }

    fn uuid(&self, id: NetworkId) -> Result<String, WifiError> {
        lock(&self.profiles)
            .get(&id)
            .cloned()
            .ok_or_else(|| WifiError::Parse(format!("unknown network id {id}")))
    }

    async fn wifi_rows(&self) -> Vec<Vec<String>> {
        match self
            .nmcli(&["-t", "-f", "ACTIVE,SSID", "device", "wifi", "list", "--rescan", "no"])
            .await
        {
            Ok(listing) => listing.lines().map(split_terse).collect(),
            Err(e) => {
                warn!("cannot list Wi-Fi networks: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl WifiControl for NetworkManagerWifi {
    async fn find_saved_network(&self, ssid: &str) -> Result<Option<NetworkId>, WifiError> {
        let listing = self.nmcli(&["-t", "-f", "UUID,TYPE", "connection", "show"]).await?;
        for fields in listing.lines().map(split_terse) {
            let [uuid, kind] = fields.as_slice() else {
                continue;
            };
            if kind != "802-11-wireless" {
                continue;
            }
            let saved_ssid = self
                .nmcli(&["-g", "802-11-wireless.ssid", "connection", "show", "uuid", uuid.as_str()])
                .await?;
            if saved_ssid.trim_end_matches('\n') == ssid {
                return Ok(Some(self.register_profile(uuid.clone())));
            }
        }
        Ok(None)
    }

    async fn add_network(
        &self,
        ssid: &str,
        credential: &Credential,
    ) -> Result<NetworkId, WifiError> {
        let interface = self.interface.as_deref().unwrap_or("*");
        let name = format!("uconfig-{ssid}");
        let args = add_profile_args(interface, &name, ssid, credential);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.nmcli(&args).await?;
        let uuid = parse_added_uuid(&output)
            .ok_or_else(|| WifiError::Parse(format!("no UUID in {:?}", output.trim())))?;
        info!("added NetworkManager profile {name} ({uuid})");
        let id = self.register_profile(uuid);
        if let Credential::Psk(psk) = credential {
            lock(&self.secrets).insert(id, psk.as_str().to_string());
        }
        Ok(id)
    }

    async fn disconnect(&self) -> Result<(), WifiError> {
        let interface = self.interface().await?;
        self.nmcli(&["device", "disconnect", interface.as_str()]).await.map(drop)
    }

    async fn enable_network(&self, id: NetworkId) -> Result<(), WifiError> {
        let uuid = self.uuid(id)?;
        let secret = lock(&self.secrets).get(&id).map(|psk| passwd_file_entry(psk));
        match secret {
            Some(entry) => self
                .nmcli_with_input(
                    &["-w", "0", "connection", "up", "uuid", uuid.as_str(), "passwd-file", "/dev/stdin"],
                    Some(&entry),
                )
                .await
                .map(drop),
            None => self
                .nmcli(&["-w", "0", "connection", "up", "uuid", uuid.as_str()])
                .await
                .map(drop),
        }
    }

    async fn disable_network(&self, id: NetworkId) -> Result<(), WifiError> {
        let uuid = self.uuid(id)?;
        self.nmcli(&["connection", "modify", "uuid", uuid.as_str(), "connection.autoconnect", "no"])
            .await
            .map(drop)
    }

    async fn remove_network(&self, id: NetworkId) -> Result<(), WifiError> {
        let uuid = self.uuid(id)?;
        self.nmcli(&["connection", "delete", "uuid", uuid.as_str()]).await?;
        lock(&self.profiles).remove(&id);
        lock(&self.secrets).remove(&id);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), WifiError> {
        let interface = self.interface().await?;
        self.nmcli(&["-w", "0", "device", "connect", interface.as_str()])
            .await
            .map(drop)
    }

    async fn current_ssid(&self) -> Option<String> {
        self.wifi_rows()
            .await
            .into_iter()
            .find(|fields| fields.first().map(String::as_str) == Some("yes"))
            .and_then(|mut fields| (fields.len() > 1).then(|| fields.swap_remove(1)))
    }

    async fn visible_ssids(&self) -> Vec<String> {
        self.wifi_rows()
            .await
            .into_iter()
            .filter_map(|mut fields| (fields.len() > 1).then(|| fields.swap_remove(1)))
            .filter(|ssid| !ssid.is_empty())
            .collect()
    }

    async fn start_scan(&self) -> Result<(), WifiError> {
        self.nmcli(&["device", "wifi", "rescan"]).await.map(drop)
    }

    async fn register_link_listener(
        &self,
        sink: LinkEventSink,
    ) -> Result<ListenerToken, WifiError> {
        let interface = self.interface().await?;
        let mut child = Command::new(NMCLI)
            .args(["device", "monitor", interface.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(WifiError::Unavailable)?;
        let Some(stdout) = child.stdout.take() else {
            return Err(WifiError::Parse("monitor has no stdout".to_string()));
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let reader_interface = interface.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(state) = parse_monitor_line(&line, &reader_interface) else {
                            continue;
                        };
                        debug!("link {state:?} ({line})");
                        if !sink.notify(state) && sink.is_closed() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("link monitor read failed: {e}");
                        break;
                    }
                }
            }
            debug!("link monitor for {reader_interface} ended");
        });

        lock(&self.monitors).insert(token, Monitor { child, reader });
        info!("monitoring link state of {interface}");
        Ok(token)
    }

    fn unregister_link_listener(&self, token: ListenerToken) {
        let monitor = lock(&self.monitors).remove(&token);
        if let Some(monitor) = monitor {
            monitor.stop();
        }
    }
}

impl Drop for NetworkManagerWifi {
    fn drop(&mut self) {
        for (_, monitor) in lock(&self.monitors).drain() {
            monitor.stop();
        }
    }
}

// ── Output parsing ────────────────────────────────────────────────────────────

/// Splits one line of `nmcli -t` output into fields.
///
/// Terse mode separates fields with `:` and escapes literal `:` and `\` with
/// a backslash.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Arguments for `nmcli connection add` creating a profile for `ssid`.
///
/// Secured profiles get WPA-PSK key management with an unsaved key; the key
/// itself is not part of the arguments.
pub fn add_profile_args(
    interface: &str,
    name: &str,
    ssid: &str,
    credential: &Credential,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "connection", "add", "type", "wifi", "ifname", interface, "con-name", name, "ssid", ssid,
        "autoconnect", "no",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    if !credential.is_open() {
        args.extend(
            ["wifi-sec.key-mgmt", "wpa-psk", "wifi-sec.psk-flags", "2"]
                .iter()
                .map(|arg| arg.to_string()),
        );
    }
    args
}

/// One `passwd-file` line supplying a WPA pre-shared key.
pub fn passwd_file_entry(psk: &str) -> String {
    format!("{PSK_SECRET}:{psk}\n")
}

/// Extracts the UUID from `Connection 'name' (uuid) successfully added.`
pub fn parse_added_uuid(output: &str) -> Option<String> {
    let start = output.rfind('(')? + 1;
    let end = start + output[start..].find(')')?;
    let uuid = output[start..end].trim();
    (!uuid.is_empty()).then(|| uuid.to_string())
}

/// Maps one `nmcli device monitor` line for `interface` to a link state.
///
/// Lines look like `wlan0: connecting (prepare)` or `wlan0: disconnected`.
/// Lines for other devices and lines that are not state changes yield `None`.
pub fn parse_monitor_line(line: &str, interface: &str) -> Option<LinkState> {
    let rest = line.strip_prefix(interface)?.strip_prefix(':')?.trim();
    let word = rest.split_whitespace().next()?;
    let state = match word {
        "connecting" => LinkState::Connecting,
        "connected" => LinkState::Connected,
        "deactivating" => LinkState::Disconnecting,
        "disconnected" | "unavailable" => LinkState::Disconnected,
        "unmanaged" => LinkState::Suspended,
        "using" | "device" => return None,
        _ => LinkState::Unknown,
    };
    Some(state)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_terse_handles_escaped_colons() {
        // Arrange / Act
        let fields = split_terse(r"yes:Cafe\:Guest:AA\:BB");

        // Assert
        assert_eq!(fields, vec!["yes", "Cafe:Guest", "AA:BB"]);
    }

    #[test]
    fn test_split_terse_keeps_empty_fields() {
        assert_eq!(split_terse("no:"), vec!["no", ""]);
        assert_eq!(split_terse(r"a\\b"), vec![r"a\b"]);
    }

    #[test]
    fn test_parse_added_uuid() {
        let out = "Connection 'uconfig-x' (5f0ad3c2-6a1b-4f2e-9c1d-0123456789ab) successfully added.\n";
        assert_eq!(
            parse_added_uuid(out).as_deref(),
            Some("5f0ad3c2-6a1b-4f2e-9c1d-0123456789ab")
        );
        assert_eq!(parse_added_uuid("nothing here"), None);
    }

    #[test]
    fn test_parse_monitor_line_maps_device_states() {
        assert_eq!(
            parse_monitor_line("wlan0: connecting (prepare)", "wlan0"),
            Some(LinkState::Connecting)
        );
        assert_eq!(parse_monitor_line("wlan0: connected", "wlan0"), Some(LinkState::Connected));
        assert_eq!(
            parse_monitor_line("wlan0: deactivating", "wlan0"),
            Some(LinkState::Disconnecting)
        );
        assert_eq!(
            parse_monitor_line("wlan0: disconnected", "wlan0"),
            Some(LinkState::Disconnected)
        );
        assert_eq!(parse_monitor_line("wlan0: unmanaged", "wlan0"), Some(LinkState::Suspended));
    }

    #[test]
    fn test_parse_monitor_line_ignores_other_devices_and_info_lines() {
        assert_eq!(parse_monitor_line("eth0: connected", "wlan0"), None);
        assert_eq!(parse_monitor_line("wlan0: using connection 'x'", "wlan0"), None);
        assert_eq!(parse_monitor_line("wlan00: connected", "wlan0"), None);
    }

    #[test]
    fn test_parse_monitor_line_unrecognised_state_is_unknown() {
        assert_eq!(
            parse_monitor_line("wlan0: need-auth", "wlan0"),
            Some(LinkState::Unknown)
        );
    }

    #[test]
    fn test_add_profile_args_keep_key_off_command_line() {
        // Arrange
        let credential = Credential::Psk("hunter2secret".to_string());

        // Act
        let args = add_profile_args("wlan0", "uconfig-Lamp", "Lamp", &credential);

        // Assert
        assert!(args.iter().all(|arg| !arg.contains("hunter2secret")));
        assert!(!args.iter().any(|arg| arg == "wifi-sec.psk"));
        assert!(args.windows(2).any(|w| w == ["wifi-sec.key-mgmt", "wpa-psk"]));
        assert!(args.windows(2).any(|w| w == ["wifi-sec.psk-flags", "2"]));
    }

    #[test]
    fn test_add_profile_args_open_network_has_no_security() {
        let args = add_profile_args("*", "uconfig-Lamp", "Lamp", &Credential::Open);

        assert!(args.windows(2).any(|w| w == ["ssid", "Lamp"]));
        assert!(!args.iter().any(|arg| arg.starts_with("wifi-sec")));
    }

    #[test]
    fn test_passwd_file_entry_names_psk_secret() {
        assert_eq!(
            passwd_file_entry("abcd5678"),
            "802-11-wireless-security.psk:abcd5678\n"
        );
    }
}
