use crate::protocol::GridLayout;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub panel: PanelSettings,

    /// Grid used until the hub reports its own.
    #[serde(default)]
    pub grid: GridLayout,
}

/// Connection and timing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelSettings {
    /// Fixed hub URL. Skips onboarding and the saved address.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Address the panel is served from, e.g. `http://192.168.1.20:3000`.
    #[serde(default)]
    pub origin: Option<String>,

    /// Where pages and credentials are persisted.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Fallback acknowledgement for a save the hub never echoes.
    #[serde(default = "default_save_ack_timeout")]
    pub save_ack_timeout_ms: u64,

    #[serde(default = "default_saved_indicator")]
    pub saved_indicator_ms: u64,

    /// Port the hub serves the panel on when hosting it itself.
    #[serde(default = "default_hub_port")]
    pub hub_default_port: u16,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            ws_url: None,
            origin: None,
            store_path: None,
            reconnect_delay_ms: default_reconnect_delay(),
            probe_timeout_ms: default_probe_timeout(),
            save_ack_timeout_ms: default_save_ack_timeout(),
            saved_indicator_ms: default_saved_indicator(),
            hub_default_port: default_hub_port(),
        }
    }
}

impl PanelSettings {
    /// Hub URL fixed at build time via `DECKPANEL_WS_URL`, else `ws_url`.
    pub fn override_url(&self) -> Option<String> {
        option_env!("DECKPANEL_WS_URL")
            .map(str::to_string)
            .or_else(|| self.ws_url.clone())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn save_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.save_ack_timeout_ms)
    }

    pub fn saved_indicator(&self) -> Duration {
        Duration::from_millis(self.saved_indicator_ms)
    }
}

// --- Defaults ---

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_probe_timeout() -> u64 {
    5000
}

fn default_save_ack_timeout() -> u64 {
    400
}

fn default_saved_indicator() -> u64 {
    2500
}

fn default_hub_port() -> u16 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: PanelConfig = toml::from_str("").unwrap();
        assert_eq!(config.panel.reconnect_delay(), Duration::from_millis(3000));
        assert_eq!(config.panel.probe_timeout_ms, 5000);
        assert_eq!(config.panel.save_ack_timeout_ms, 400);
        assert_eq!(config.panel.saved_indicator_ms, 2500);
        assert_eq!(config.panel.hub_default_port, 3000);
        assert_eq!(config.grid, GridLayout::default());
        assert!(config.panel.ws_url.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[panel]
origin = "http://192.168.1.20:3000"
store_path = "/var/lib/deckpanel/store.json"
reconnect_delay_ms = 1500
save_ack_timeout_ms = 250

[grid]
cols = 5
rows = 2
gap = 8
"#;
        let config: PanelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.panel.origin.as_deref(),
            Some("http://192.168.1.20:3000")
        );
        assert_eq!(config.panel.reconnect_delay_ms, 1500);
        assert_eq!(config.panel.save_ack_timeout(), Duration::from_millis(250));
        assert_eq!(config.panel.saved_indicator_ms, 2500);
        assert_eq!(config.grid.capacity(), 10);
    }

    #[test]
    fn blank_ws_url_is_no_override() {
        let settings = PanelSettings {
            ws_url: Some("  ".into()),
            ..PanelSettings::default()
        };
        if option_env!("DECKPANEL_WS_URL").is_none() {
            assert_eq!(settings.override_url(), None);
        }
    }
}
