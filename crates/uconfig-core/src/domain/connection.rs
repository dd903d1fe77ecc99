//! Vocabulary of a connection session.
//!
//! A session joins a device's provisioning access point, lets the operator
//! exchange configuration with it, and then puts the host's previous network
//! setup back.  The types here describe that session without performing any
//! I/O: the state the controller is in, the signals it reports, the link
//! notifications it consumes and the network it targets.

use std::fmt;

use thiserror::Error;

/// Credential text meaning "this network has no password".
pub const OPEN_NETWORK_SENTINEL: &str = "nopassword";

/// SSID prefix of device provisioning networks.
pub const PROVISIONING_SSID_PREFIX: &str = "uConfig ";

/// Length of the network id that follows [`PROVISIONING_SSID_PREFIX`].
const PROVISIONING_ID_LEN: usize = 4;

/// State of a connection controller.
///
/// ```text
/// Idle ──start──▶ Connecting ◀──────▶ Associated
///                     │                   │
///                     └──────┬────────────┘
///                            ▼
///                 Disconnecting ─▶ Restoring ─▶ Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, `start()` not yet called.
    Idle,
    /// Association with the target requested; waiting for the link.
    Connecting,
    /// Link is up on the target network.
    Associated,
    /// Teardown is disconnecting from the target.
    Disconnecting,
    /// Teardown is removing the session profile and re-enabling auto-connect.
    Restoring,
    /// Teardown finished; the session is over.
    Terminated,
}

impl ConnectionState {
    pub fn is_associated(self) -> bool {
        self == Self::Associated
    }

    /// `true` once teardown has started.
    pub fn is_tearing_down(self) -> bool {
        matches!(self, Self::Disconnecting | Self::Restoring | Self::Terminated)
    }
}

/// Signals reported to the owner of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSignal {
    /// The link came up on the target network.
    Connect,
    /// The link on the target network was lost.
    Disconnect,
    /// The session ended and the previous network setup was restored.
    Finished,
    /// The session ended because the network-info permission is missing.
    NoPermission,
}

impl SessionSignal {
    /// `Finished` and `NoPermission` end a session; exactly one is emitted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::NoPermission)
    }
}

/// Link notifications published by the platform's connectivity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Suspended,
    Unknown,
}

impl LinkState {
    /// Maps a platform state name to a [`LinkState`], case-insensitively.
    ///
    /// Anything unrecognised becomes [`LinkState::Unknown`].
    pub fn from_platform(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "CONNECTING" => Self::Connecting,
            "CONNECTED" => Self::Connected,
            "DISCONNECTING" => Self::Disconnecting,
            "DISCONNECTED" => Self::Disconnected,
            "SUSPENDED" => Self::Suspended,
            _ => Self::Unknown,
        }
    }
}

/// How to authenticate to a network.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Open network, no key management.
    Open,
    /// WPA pre-shared key.
    Psk(String),
}

impl Credential {
    /// Interprets credential text, where [`OPEN_NETWORK_SENTINEL`] means open.
    pub fn from_text(text: &str) -> Self {
        if text == OPEN_NETWORK_SENTINEL {
            Self::Open
        } else {
            Self::Psk(text.to_string())
        }
    }

    /// The credential as text, using the sentinel for open networks.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Open => OPEN_NETWORK_SENTINEL,
            Self::Psk(psk) => psk,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

// Keys stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("Open"),
            Self::Psk(_) => f.write_str("Psk(***)"),
        }
    }
}

/// Errors produced when building a [`NetworkTarget`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("SSID must not be empty")]
    EmptySsid,

    #[error("pre-shared key must not be empty; use \"nopassword\" for open networks")]
    EmptyPsk,
}

/// The network a session joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTarget {
    ssid: String,
    credential: Credential,
}

impl NetworkTarget {
    /// Builds a target from an SSID and credential text.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError`] for an empty SSID or an empty key.
    pub fn new(ssid: impl Into<String>, psk: &str) -> Result<Self, TargetError> {
        let ssid = ssid.into();
        if ssid.is_empty() {
            return Err(TargetError::EmptySsid);
        }
        if psk.is_empty() {
            return Err(TargetError::EmptyPsk);
        }
        Ok(Self {
            ssid,
            credential: Credential::from_text(psk),
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

/// Derives the target for a device provisioning network seen in a scan.
///
/// Provisioning SSIDs look like `"uConfig XXXX"`.  When the id is four
/// characters long and the BSSID has six octets, the key is the id followed
/// by the last two BSSID octets in lowercase.  Other provisioning SSIDs are
/// open networks.  Returns `None` when the SSID is not a provisioning network.
///
/// ```rust
/// use uconfig_core::domain::connection::{derive_target, Credential};
///
/// let target = derive_target("uConfig AB12", "00:11:22:33:C4:D5").unwrap();
/// assert_eq!(target.credential(), &Credential::Psk("AB12c4d5".to_string()));
/// assert!(derive_target("HomeWifi", "00:11:22:33:44:55").is_none());
/// ```
pub fn derive_target(ssid: &str, bssid: &str) -> Option<NetworkTarget> {
    let network_id = ssid.strip_prefix(PROVISIONING_SSID_PREFIX)?;

    let bssid = bssid.to_ascii_lowercase();
    let octets: Vec<&str> = bssid.split(':').collect();

    let psk = if network_id.chars().count() == PROVISIONING_ID_LEN && octets.len() == 6 {
        format!("{network_id}{}{}", octets[4], octets[5])
    } else {
        OPEN_NETWORK_SENTINEL.to_string()
    };

    NetworkTarget::new(ssid, &psk).ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
