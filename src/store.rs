use crate::error::{PanelError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Keys the panel persists.
pub mod keys {
    pub const HUB_HOST: &str = "hub_host";
    pub const TOKEN: &str = "hub_token";
    pub const PAGES: &str = "pages";
    pub const ACTIVE_PAGE: &str = "active_page";
    pub const HUB_PAGE: &str = "hub_page";
    pub const GRID: &str = "grid";
}

/// Opaque string key-value storage that outlives the process.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    /// Returns `PanelError::Store` or `PanelError::Io` if the value cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set every listed pair in one write. Either all of them land or none.
    ///
    /// # Errors
    /// Returns `PanelError::Store` or `PanelError::Io` if the change cannot be written.
    fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()>;

    /// Remove every listed key in one write.
    ///
    /// # Errors
    /// Returns `PanelError::Store` or `PanelError::Io` if the change cannot be written.
    fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PanelError::Store(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PanelError::Store(e.to_string()))?;
        for (key, value) in pairs {
            entries.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PanelError::Store(e.to_string()))?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// A JSON object on disk. Every change rewrites the file through a temp file
/// and a rename, so readers never see half a write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// # Errors
    /// Returns `PanelError::Io` if an existing file cannot be read.
    /// A corrupt file is logged and treated as empty.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!("store {} is corrupt, starting empty: {e}", path.display());
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        debug!("opened store {} ({} keys)", path.display(), entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// Default location under the platform data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deckpanel")
            .join("store.json")
    }

    /// Apply `change` to a copy of the entries, write the copy, and only then
    /// make it visible to readers.
    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PanelError::Store(e.to_string()))?;
        let mut next = entries.clone();
        change(&mut next);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        self.update(|entries| {
            for (key, value) in pairs {
                entries.insert((*key).to_string(), (*value).to_string());
            }
        })
    }

    fn remove(&self, keys: &[&str]) -> Result<()> {
        self.update(|entries| {
            for key in keys {
                entries.remove(*key);
            }
        })
    }
}
