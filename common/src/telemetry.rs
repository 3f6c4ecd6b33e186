use alloc::{format, string::String};
use serde::{Deserialize, Serialize};

/// Every topic the plug touches lives under this prefix.
pub const TOPIC_NAMESPACE: &str = "breeze/devices";

/// Device metadata reported in the discovery announcement
pub const DEVICE_NAME: &str = "Smart Plug";
pub const FIRMWARE_VERSION: &str = "1.0.0";

/// Anchor for the state timestamp, in Unix seconds (2024-12-28 13:20 UTC).
/// There is no time source on the device, so elapsed boot time is added to
/// this fixed point. The result drifts from real time.
pub const SYNTHETIC_EPOCH_SECS: u64 = 1_735_392_000;

/// The three kinds of outbound messages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Discovery,
    Status,
    State,
}

impl MessageKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            MessageKind::Discovery => "discovery",
            MessageKind::Status => "status",
            MessageKind::State => "state",
        }
    }

    /// Only discovery is kept by the broker for late subscribers
    pub fn retained(&self) -> bool {
        matches!(self, MessageKind::Discovery)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Discovery => "Discovery",
            MessageKind::Status => "Status",
            MessageKind::State => "State",
        }
    }
}

/// Logical relay state as it appears on the wire (`"on"` / `"off"`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn is_on(&self) -> bool {
        matches!(self, RelayState::On)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        }
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        if on {
            RelayState::On
        } else {
            RelayState::Off
        }
    }
}

/// Topic names for one device, all derived from its identifier.
/// Format: breeze/devices/{device_id}/{suffix}
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(device_id: &str) -> Self {
        Self {
            base: format!("{}/{}", TOPIC_NAMESPACE, device_id),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn for_kind(&self, kind: MessageKind) -> String {
        format!("{}/{}", self.base, kind.suffix())
    }

    pub fn discovery(&self) -> String {
        self.for_kind(MessageKind::Discovery)
    }

    pub fn status(&self) -> String {
        self.for_kind(MessageKind::Status)
    }

    pub fn state(&self) -> String {
        self.for_kind(MessageKind::State)
    }

    /// Subscription covering every command subtopic
    pub fn command_wildcard(&self) -> String {
        format!("{}/command/+", self.base)
    }

    /// The only command topic that is acted on
    pub fn command_set_state(&self) -> String {
        format!("{}/command/set_state", self.base)
    }
}

/// Retained identity announcement, sent once per broker session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub hardware: String,
    pub firmware: String,
    pub ip: String,
    pub mac: String,
    pub state: RelayState,
}

/// Liveness sample. `uptime` is whole seconds since boot, `wifi_strength`
/// is the RSSI in dBm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub online: bool,
    pub wifi_strength: i32,
    pub uptime: u64,
    pub free_heap: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    pub state: RelayState,
    /// Milliseconds since the synthetic epoch, see [`synthetic_timestamp_ms`]
    pub timestamp: u64,
}

/// Millisecond timestamp derived from time since boot. Whole seconds are
/// added to the anchor before scaling, so the value always ends in `000`.
pub fn synthetic_timestamp_ms(boot_ms: u64) -> u64 {
    (SYNTHETIC_EPOCH_SECS + boot_ms / 1000) * 1000
}
