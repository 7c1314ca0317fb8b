pub mod schema;

use crate::error::{PanelError, Result};
use schema::PanelConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load and parse configuration from a TOML file.
///
/// # Errors
/// Returns `PanelError::ConfigNotFound` if the file doesn't exist,
/// `PanelError::Io` on read errors, `PanelError::TomlParse` on syntax errors,
/// or `PanelError::Config` on validation failures.
pub fn load(path: &Path) -> Result<PanelConfig> {
    if !path.exists() {
        return Err(PanelError::ConfigNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let content = expand_env_vars(&content);
    let config: PanelConfig = toml::from_str(&content)?;

    validate(&config)?;
    Ok(config)
}

/// Load an explicitly given file, or the default file if it exists, or fall
/// back to built-in defaults.
///
/// # Errors
/// Same as [`load`]. A missing explicit path is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<PanelConfig> {
    if let Some(path) = path {
        return load(path);
    }
    match default_path() {
        Some(path) if path.exists() => load(&path),
        _ => {
            debug!("no config file, using defaults");
            Ok(PanelConfig::default())
        }
    }
}

/// `<config dir>/deckpanel/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("deckpanel").join("config.toml"))
}

/// Expand `${VAR}` and `$VAR` patterns in the config string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    // Keep original if env var not found
                    use std::fmt::Write;
                    let _ = write!(result, "${{{var_name}}}");
                }
            } else {
                let var_name: String = chars
                    .by_ref()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if var_name.is_empty() {
                    result.push('$');
                } else if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    result.push('$');
                    result.push_str(&var_name);
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Validate config constraints.
fn validate(config: &PanelConfig) -> Result<()> {
    let panel = &config.panel;

    if let Some(url) = &panel.ws_url {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(PanelError::Config(format!(
                "ws_url must start with ws:// or wss://, got '{url}'"
            )));
        }
    }

    for (name, ms) in [
        ("reconnect_delay_ms", panel.reconnect_delay_ms),
        ("probe_timeout_ms", panel.probe_timeout_ms),
        ("save_ack_timeout_ms", panel.save_ack_timeout_ms),
    ] {
        if ms == 0 {
            return Err(PanelError::Config(format!("{name} must be greater than 0")));
        }
    }

    if !config.grid.is_valid() {
        return Err(PanelError::Config(format!(
            "grid: cols must be one of {:?} and rows at least 1",
            crate::protocol::GridLayout::COLUMN_CHOICES
        )));
    }

    Ok(())
}
