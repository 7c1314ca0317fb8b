use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Button id → button definition. Keeps wire order, but nothing relies on it
/// except the initial page order derived from a fresh hub config.
pub type ButtonMap = IndexMap<String, ButtonConfig>;

/// A single hotkey button as the hub stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub label: String,

    /// Hotkey combo such as `ctrl+shift+m`. May be empty.
    #[serde(default)]
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ButtonConfig {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            description: None,
            icon: None,
        }
    }
}

/// Hub-side settings. Read-only from the panel's point of view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSettings {
    #[serde(default)]
    pub debounce_ms: u64,
    #[serde(default)]
    pub allow_remote_config: bool,
}

/// Grid dimensions of the deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub cols: u16,
    pub rows: u16,
    pub gap: u16,
}

impl GridLayout {
    /// Column counts the panel offers.
    pub const COLUMN_CHOICES: [u16; 4] = [3, 4, 5, 6];

    /// Number of slots on a page.
    pub fn capacity(&self) -> usize {
        usize::from(self.cols) * usize::from(self.rows)
    }

    pub fn is_valid(&self) -> bool {
        Self::COLUMN_CHOICES.contains(&self.cols) && self.rows > 0
    }
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            cols: 4,
            rows: 3,
            gap: 12,
        }
    }
}

/// The one configuration object the hub holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckConfiguration {
    #[serde(default)]
    pub buttons: ButtonMap,
    #[serde(default)]
    pub settings: HubSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridLayout>,
}

/// Role announced in `join_room`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    ButtonUi,
    Admin,
    Desktop,
}

impl ClientRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ButtonUi => "button_ui",
            Self::Admin => "admin",
            Self::Desktop => "desktop",
        }
    }
}

/// Payload of an `update_config` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigUpdate {
    /// Patch one button in place.
    Button {
        #[serde(rename = "buttonId")]
        button_id: String,
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Replace the whole button map (and optionally the grid).
    Replace {
        buttons: ButtonMap,
        #[serde(skip_serializing_if = "Option::is_none")]
        grid: Option<GridLayout>,
    },
}

/// Messages sent from the panel to the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    JoinRoom {
        role: ClientRole,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    TriggerKey {
        #[serde(rename = "buttonId")]
        button_id: String,
    },
    UpdateConfig(ConfigUpdate),
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::TriggerKey { .. } => "trigger_key",
            Self::UpdateConfig(_) => "update_config",
        }
    }

    /// Encode as the single JSON text frame the hub expects.
    ///
    /// # Errors
    /// Returns `serde_json::Error` if a value cannot be serialized.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages pushed by the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    ConfigLoaded(DeckConfiguration),
    ConfigUpdated(DeckConfiguration),
    RoomJoined { role: String },
    TriggerKeyAck { button_id: String, key: String },
    ListenerStatus { connected: bool },
    AuthError { message: Option<String> },
    Error { message: Option<String> },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct RoleData {
    role: String,
}

#[derive(Deserialize)]
struct AckData {
    #[serde(rename = "buttonId")]
    button_id: String,
    #[serde(default)]
    key: String,
}

#[derive(Deserialize)]
struct ListenerData {
    connected: bool,
}

#[derive(Deserialize)]
struct MessageData {
    #[serde(default)]
    message: Option<String>,
}

impl Inbound {
    /// Parse one text frame. Malformed frames and unknown events yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                debug!("dropping malformed frame: {e}");
                return None;
            }
        };

        let data = envelope.data;
        let parsed = match envelope.event.as_str() {
            "config_loaded" => serde_json::from_value(data).map(Self::ConfigLoaded),
            "config_updated" => serde_json::from_value(data).map(Self::ConfigUpdated),
            "room_joined" => {
                serde_json::from_value::<RoleData>(data).map(|d| Self::RoomJoined { role: d.role })
            }
            "trigger_key_ack" => {
                serde_json::from_value::<AckData>(data).map(|d| Self::TriggerKeyAck {
                    button_id: d.button_id,
                    key: d.key,
                })
            }
            "listener_status" => serde_json::from_value::<ListenerData>(data)
                .map(|d| Self::ListenerStatus {
                    connected: d.connected,
                }),
            "auth_error" => serde_json::from_value::<Option<MessageData>>(data).map(|d| {
                Self::AuthError {
                    message: d.and_then(|m| m.message),
                }
            }),
            "error" => serde_json::from_value::<Option<MessageData>>(data).map(|d| Self::Error {
                message: d.and_then(|m| m.message),
            }),
            other => {
                debug!("ignoring unknown event: {other}");
                return None;
            }
        };

        match parsed {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!("dropping malformed '{}' payload: {e}", envelope.event);
                None
            }
        }
    }
}
