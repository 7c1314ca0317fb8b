use std::path::PathBuf;

/// Central error type for deckpanel.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Validation(String),

    #[error("a save is already waiting for acknowledgement")]
    SaveInFlight,

    #[error("page not found: {0}")]
    PageNotFound(String),

    #[error("button not found: {0}")]
    ButtonNotFound(String),

    #[error("no hub address configured, run `deckpanel connect` first")]
    NeedsOnboarding,

    #[error("hub rejected the admin token, saved credentials were cleared")]
    Unauthorized,

    #[error(transparent)]
    Probe(#[from] ProbeFailure),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an onboarding probe did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("Please enter an IP address and port.")]
    MissingAddress,

    #[error("Invalid token. Check the admin token in your hub config.json.")]
    InvalidToken,

    #[error("Could not reach hub at {host}. Make sure it's running and on the same network.")]
    Unreachable { host: String },

    #[error("Connection refused at {host}. Check the IP and port.")]
    Refused { host: String },
}

pub type Result<T> = std::result::Result<T, PanelError>;
