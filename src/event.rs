use crate::connection::ConnectionState;
use crate::protocol::DeckConfiguration;
use std::sync::Arc;

/// Which inbound event carried a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Sent once after `join_room`.
    Loaded,
    /// Broadcast after any client saved.
    Updated,
}

/// Events flowing through the broadcast channel connecting all subsystems.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// Hub connection moved to a new state.
    StatusChanged(ConnectionState),

    /// The hub sent its full configuration.
    ConfigReceived {
        config: Arc<DeckConfiguration>,
        source: ConfigSource,
    },

    /// The secondary listener peer came or went.
    ListenerStatus(bool),

    /// The hub confirmed our role.
    RoomJoined(String),

    /// The hub injected the hotkey for a button.
    TriggerAcked { button_id: String, key: String },

    /// The hub reported a non-fatal error.
    ServerError(String),

    /// The hub rejected our token; saved credentials are already gone.
    Unauthorized,
}
