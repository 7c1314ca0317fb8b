use crate::error::{PanelError, Result};
use crate::protocol::{ButtonMap, DeckConfiguration, GridLayout};
use crate::store::{keys, KvStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One client-side layout. The hub never sees pages, only the flattened
/// buttons of whichever page is active when saving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub buttons: ButtonMap,
    /// Slot placement, row-major.
    #[serde(default)]
    pub order: Vec<String>,
    /// Holds edits the hub has not acknowledged.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unsaved: bool,
}

impl Page {
    fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            buttons: ButtonMap::new(),
            order: Vec::new(),
            unsaved: false,
        }
    }
}

/// The ordered list of pages and which one is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBook {
    pages: Vec<Page>,
    active: String,
    /// Page whose contents the hub currently holds, if known.
    hub_page: Option<String>,
}

impl PageBook {
    /// Restore the persisted page list, if there is one.
    pub fn load(store: &dyn KvStore) -> Option<Self> {
        let raw = store.get(keys::PAGES)?;
        let pages: Vec<Page> = match serde_json::from_str(&raw) {
            Ok(pages) => pages,
            Err(e) => {
                warn!("ignoring unreadable page list: {e}");
                return None;
            }
        };
        let first = pages.first()?.id.clone();

        let active = store
            .get(keys::ACTIVE_PAGE)
            .filter(|id| pages.iter().any(|p| &p.id == id))
            .unwrap_or(first);
        let hub_page = store
            .get(keys::HUB_PAGE)
            .filter(|id| pages.iter().any(|p| &p.id == id));

        debug!("restored {} pages, active {active}", pages.len());
        Some(Self {
            pages,
            active,
            hub_page,
        })
    }

    /// A single `Default` page seeded from the hub configuration.
    pub fn from_config(config: &DeckConfiguration) -> Self {
        let mut page = Page::new("Default");
        page.buttons = config.buttons.clone();
        page.order = config.buttons.keys().cloned().collect();
        let id = page.id.clone();
        info!("created Default page with {} buttons", page.order.len());
        Self {
            pages: vec![page],
            active: id.clone(),
            hub_page: Some(id),
        }
    }

    /// # Errors
    /// Returns a JSON or store error if the list cannot be written.
    pub fn persist(&self, store: &dyn KvStore) -> Result<()> {
        let pages = serde_json::to_string(&self.pages)?;
        match &self.hub_page {
            Some(hub) => store.set_many(&[
                (keys::PAGES, pages.as_str()),
                (keys::ACTIVE_PAGE, self.active.as_str()),
                (keys::HUB_PAGE, hub.as_str()),
            ]),
            None => {
                store.set_many(&[
                    (keys::PAGES, pages.as_str()),
                    (keys::ACTIVE_PAGE, self.active.as_str()),
                ])?;
                store.remove(&[keys::HUB_PAGE])
            }
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn active_id(&self) -> &str {
        &self.active
    }

    pub fn active(&self) -> &Page {
        self.pages
            .iter()
            .find(|p| p.id == self.active)
            .unwrap_or(&self.pages[0])
    }

    pub fn get(&self, id: &str) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == id)
    }

    pub fn hub_page(&self) -> Option<&str> {
        self.hub_page.as_deref()
    }

    /// Record that the hub now holds the active page.
    pub fn bind_active(&mut self) {
        self.hub_page = Some(self.active.clone());
    }

    pub fn is_active_bound(&self) -> bool {
        self.hub_page.as_deref() == Some(self.active.as_str())
    }

    /// Write the editor's working copy back into the active page.
    pub fn store_active(&mut self, buttons: &ButtonMap, order: &[String], unsaved: bool) {
        let active = self.active.clone();
        if let Some(page) = self.pages.iter_mut().find(|p| p.id == active) {
            page.buttons = buttons.clone();
            page.order = order.to_vec();
            page.unsaved = unsaved;
        }
    }

    /// Append an empty page named `Page N` and return its id.
    pub fn create_page(&mut self) -> String {
        let page = Page::new(&format!("Page {}", self.pages.len() + 1));
        let id = page.id.clone();
        info!("created page '{}'", page.name);
        self.pages.push(page);
        id
    }

    /// Make `id` the active page. The caller flushes its working copy into
    /// the outgoing page first via [`PageBook::store_active`].
    ///
    /// # Errors
    /// Returns `PanelError::PageNotFound` for an unknown id.
    pub fn switch_to(&mut self, id: &str) -> Result<&Page> {
        let page = self
            .pages
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| PanelError::PageNotFound(id.to_string()))?;
        info!("switch page: {} → {}", self.active, page.id);
        self.active = page.id.clone();
        Ok(page)
    }

    /// Delete a page. The last remaining page cannot be deleted.
    /// Returns `true` if a page was removed.
    ///
    /// # Errors
    /// Returns `PanelError::PageNotFound` for an unknown id.
    pub fn delete_page(&mut self, id: &str) -> Result<bool> {
        let index = self
            .pages
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PanelError::PageNotFound(id.to_string()))?;
        if self.pages.len() == 1 {
            debug!("refusing to delete the only page");
            return Ok(false);
        }

        let removed = self.pages.remove(index);
        info!("deleted page '{}'", removed.name);
        if self.active == removed.id {
            let next = index.min(self.pages.len() - 1);
            self.active = self.pages[next].id.clone();
        }
        if self.hub_page.as_deref() == Some(removed.id.as_str()) {
            self.hub_page = None;
        }
        Ok(true)
    }

    /// Rename a page. Blank names are ignored. Returns `true` on change.
    ///
    /// # Errors
    /// Returns `PanelError::PageNotFound` for an unknown id.
    pub fn rename_page(&mut self, id: &str, name: &str) -> Result<bool> {
        let page = self
            .pages
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PanelError::PageNotFound(id.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }
        page.name = name.to_string();
        Ok(true)
    }

    /// Resolve a page by id, or by case-insensitive name.
    pub fn find(&self, id_or_name: &str) -> Option<&Page> {
        self.get(id_or_name).or_else(|| {
            self.pages
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(id_or_name.trim()))
        })
    }
}

/// Grid seeded from storage for instant paint, before the hub answers.
pub fn load_grid(store: &dyn KvStore) -> Option<GridLayout> {
    let raw = store.get(keys::GRID)?;
    serde_json::from_str::<GridLayout>(&raw)
        .ok()
        .filter(GridLayout::is_valid)
}

/// # Errors
/// Returns a JSON or store error if the grid cannot be written.
pub fn persist_grid(store: &dyn KvStore, grid: GridLayout) -> Result<()> {
    store.set(keys::GRID, &serde_json::to_string(&grid)?)
}
