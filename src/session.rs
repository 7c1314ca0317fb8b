use crate::error::{PanelError, Result};
use crate::protocol::ClientRole;
use crate::store::{keys, KvStore};
use std::sync::Arc;
use tracing::info;

/// Port the hub serves the panel from when it hosts it itself.
pub const HUB_DEFAULT_PORT: u16 = 3000;

/// Build the WebSocket URL for a `host:port` pair.
pub fn build_ws_url(host: &str) -> String {
    format!("ws://{host}")
}

/// Everything a connection needs to reach the hub. Built once at startup and
/// replaced wholesale after credentials are purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub url: String,
    pub token: Option<String>,
    pub role: ClientRole,
}

/// Saved hub address and admin token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSession {
    pub hub_host: String,
    pub token: String,
}

/// Where the hub lives and whether the user has to be asked.
pub struct SessionStore {
    store: Arc<dyn KvStore>,
    override_url: Option<String>,
    origin: Option<String>,
    default_port: u16,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            override_url: None,
            origin: None,
            default_port: HUB_DEFAULT_PORT,
        }
    }

    /// Fixed URL that bypasses onboarding entirely.
    #[must_use]
    pub fn with_override(mut self, url: Option<String>) -> Self {
        self.override_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    /// `host:port` the panel itself is served from.
    #[must_use]
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin
            .as_deref()
            .and_then(origin_authority)
            .map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn hub_host(&self) -> Option<String> {
        self.store.get(keys::HUB_HOST).filter(|h| !h.is_empty())
    }

    pub fn token(&self) -> Option<String> {
        self.store.get(keys::TOKEN).filter(|t| !t.is_empty())
    }

    pub fn saved(&self) -> Option<SavedSession> {
        Some(SavedSession {
            hub_host: self.hub_host()?,
            token: self.token().unwrap_or_default(),
        })
    }

    /// True when the user must enter a hub address before anything connects.
    pub fn needs_onboarding(&self) -> bool {
        if self.override_url.is_some() {
            return false;
        }
        if self.hub_host().is_some() {
            return false;
        }
        !self
            .origin
            .as_deref()
            .and_then(|o| o.rsplit_once(':'))
            .and_then(|(_, port)| port.parse::<u16>().ok())
            .is_some_and(|port| port == self.default_port)
    }

    /// Resolve the transport target: override, then saved host, then origin.
    ///
    /// # Errors
    /// Returns `PanelError::NeedsOnboarding` if none of them is available.
    pub fn resolve_url(&self) -> Result<String> {
        if let Some(url) = &self.override_url {
            return Ok(url.clone());
        }
        if let Some(host) = self.hub_host() {
            return Ok(build_ws_url(&host));
        }
        if let Some(origin) = &self.origin {
            return Ok(build_ws_url(origin));
        }
        Err(PanelError::NeedsOnboarding)
    }

    /// Snapshot the current target and credentials for one connection.
    ///
    /// # Errors
    /// Returns `PanelError::NeedsOnboarding` if no target resolves.
    pub fn context(&self, role: ClientRole) -> Result<SessionContext> {
        Ok(SessionContext {
            url: self.resolve_url()?,
            token: self.token(),
            role,
        })
    }

    /// Persist a host and token that passed the onboarding probe.
    ///
    /// # Errors
    /// Returns a store error if the pair cannot be written. Neither value
    /// changes in that case.
    pub fn save(&self, hub_host: &str, token: &str) -> Result<()> {
        self.store
            .set_many(&[(keys::HUB_HOST, hub_host), (keys::TOKEN, token)])?;
        info!("saved hub address {hub_host}");
        Ok(())
    }

    /// Forget the hub address together with its token.
    ///
    /// # Errors
    /// Returns a store error if the removal cannot be written.
    pub fn purge(&self) -> Result<()> {
        self.store.remove(&[keys::HUB_HOST, keys::TOKEN])?;
        info!("cleared saved hub address and token");
        Ok(())
    }
}

/// Strip scheme and path from an origin, leaving `host[:port]`.
fn origin_authority(origin: &str) -> Option<&str> {
    let origin = origin.trim();
    let authority = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest)
        .split('/')
        .next()?;
    (!authority.is_empty()).then_some(authority)
}
