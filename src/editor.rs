use crate::edit::{self, DropTarget, HotkeyTemplate};
use crate::error::{PanelError, Result};
use crate::mirror::{ConfigMirror, Reconciled, SaveAck, SaveIndicator, WorkingCopy};
use crate::page::{self, PageBook};
use crate::protocol::{ButtonConfig, DeckConfiguration, GridLayout, Outbound};
use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// The admin editing surface: the config mirror for the active page, the
/// page list behind it, and the current selection. Every mutation is
/// persisted before it returns.
pub struct Editor {
    store: Arc<dyn KvStore>,
    mirror: ConfigMirror,
    pages: Option<PageBook>,
    selected: Option<String>,
}

impl Editor {
    /// Restore pages and grid from storage. Without a stored page list the
    /// editor waits for the first hub configuration to seed one.
    pub fn new(store: Arc<dyn KvStore>, default_grid: GridLayout) -> Self {
        let grid = page::load_grid(store.as_ref()).unwrap_or(default_grid);
        let mut mirror = ConfigMirror::new(grid);
        let pages = PageBook::load(store.as_ref());
        if let Some(book) = &pages {
            let active = book.active();
            mirror.load_page(
                active.buttons.clone(),
                active.order.clone(),
                book.is_active_bound(),
            );
            if active.unsaved {
                debug!("resuming unsaved edits on '{}'", active.name);
                mirror.mark_dirty();
            }
        }
        Self {
            store,
            mirror,
            pages,
            selected: None,
        }
    }

    #[must_use]
    pub fn with_timings(mut self, ack_timeout: Duration, indicator_for: Duration) -> Self {
        self.mirror = self.mirror.with_timings(ack_timeout, indicator_for);
        self
    }

    pub fn mirror(&self) -> &ConfigMirror {
        &self.mirror
    }

    pub fn pages(&self) -> Option<&PageBook> {
        self.pages.as_ref()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.mirror.is_dirty()
    }

    pub fn grid(&self) -> GridLayout {
        self.mirror.grid()
    }

    pub fn save_indicator(&self) -> SaveIndicator {
        self.mirror.save_indicator()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.mirror.next_deadline()
    }

    /// Feed a configuration pushed by the hub.
    ///
    /// # Errors
    /// Returns a store error if the resulting state cannot be persisted.
    pub fn on_remote_config(
        &mut self,
        config: DeckConfiguration,
        now: Instant,
    ) -> Result<Reconciled> {
        let bootstrap = self.pages.is_none();
        let reconciled = self.mirror.apply_remote(config, now);

        if bootstrap {
            if let Some(remote) = self.mirror.remote() {
                self.pages = Some(PageBook::from_config(remote));
            }
        }
        if reconciled.grid_applied {
            info!("grid from hub: {}x{}", self.grid().cols, self.grid().rows);
            page::persist_grid(self.store.as_ref(), self.grid())?;
        }
        if reconciled.working == WorkingCopy::Replaced || reconciled.ack.is_some() || bootstrap {
            self.retain_selection();
            self.commit()?;
        }
        Ok(reconciled)
    }

    /// Advance save timers.
    ///
    /// # Errors
    /// Returns a store error if an acknowledged save cannot be persisted.
    pub fn poll(&mut self, now: Instant) -> Result<Option<SaveAck>> {
        let ack = self.mirror.poll(now);
        if ack.is_some() {
            self.commit()?;
        }
        Ok(ack)
    }

    /// Flatten the active page into one `update_config` message.
    ///
    /// # Errors
    /// Returns `PanelError::SaveInFlight` while an earlier save is pending,
    /// or a store error if the binding cannot be persisted.
    pub fn request_save(&mut self, now: Instant) -> Result<Outbound> {
        let message = self.mirror.request_save(now)?;
        self.book_mut()?.bind_active();
        self.commit()?;
        Ok(message)
    }

    // --- Buttons ---

    /// Append a blank button. Returns its id.
    ///
    /// # Errors
    /// Returns an error before the first configuration arrives, or on store failure.
    pub fn add_button(&mut self) -> Result<String> {
        self.book_mut()?;
        let id = self.mirror.edit(|buttons, order| {
            let id = edit::next_button_id(buttons, order);
            buttons.insert(id.clone(), blank_button());
            order.push(id.clone());
            id
        });
        self.commit()?;
        Ok(id)
    }

    /// Place a blank button at `slot`, shifting later slots right.
    ///
    /// # Errors
    /// Returns `PanelError::Validation` for a slot outside the grid, or before
    /// the first configuration arrives.
    pub fn insert_button(&mut self, slot: usize) -> Result<String> {
        self.book_mut()?;
        let capacity = self.require_slot(slot)?;
        let id = self.mirror.edit(|buttons, order| {
            let id = edit::next_button_id(buttons, order);
            buttons.insert(id.clone(), blank_button());
            edit::insert_at(order, id.clone(), slot, capacity);
            id
        });
        self.commit()?;
        Ok(id)
    }

    /// Drop a system hotkey onto a cell or a button.
    ///
    /// # Errors
    /// Returns `PanelError::ButtonNotFound` for an unknown target button, or
    /// `PanelError::Validation` for a cell outside the grid.
    pub fn drop_template(&mut self, target: &DropTarget, template: &HotkeyTemplate) -> Result<String> {
        self.book_mut()?;
        let capacity = match target {
            DropTarget::Button(id) => {
                self.require_button(id)?;
                self.grid().capacity()
            }
            DropTarget::Cell(slot) => self.require_slot(*slot)?,
        };
        let placed = self.mirror.edit(|buttons, order| {
            edit::drop_template(buttons, order, target, template, capacity)
        });
        self.commit()?;
        placed.ok_or_else(|| PanelError::ButtonNotFound(format!("{target:?}")))
    }

    /// Drag `active` onto `over`. Returns `false` if nothing moved.
    ///
    /// # Errors
    /// Returns an error before the first configuration arrives, or on store failure.
    pub fn move_button(&mut self, active: &str, over: &str) -> Result<bool> {
        self.book_mut()?;
        let order = self.mirror.order();
        let movable = active != over
            && order.iter().any(|id| id == active)
            && order.iter().any(|id| id == over);
        if !movable {
            return Ok(false);
        }
        self.mirror
            .edit(|_, order| edit::move_button(order, active, over));
        self.commit()?;
        Ok(true)
    }

    /// Move the entry at slot `from` to slot `to`.
    ///
    /// # Errors
    /// Returns an error before the first configuration arrives, or on store failure.
    pub fn move_slot(&mut self, from: usize, to: usize) -> Result<bool> {
        self.book_mut()?;
        let len = self.mirror.order().len();
        if from >= len || to >= len || from == to {
            return Ok(false);
        }
        self.mirror.edit(|_, order| edit::move_slot(order, from, to));
        self.commit()?;
        Ok(true)
    }

    /// Delete a button from the active page.
    ///
    /// # Errors
    /// Returns `PanelError::ButtonNotFound` if the id is on neither side.
    pub fn delete_button(&mut self, id: &str) -> Result<()> {
        self.book_mut()?;
        let known = self.mirror.buttons().contains_key(id)
            || self.mirror.order().iter().any(|entry| entry == id);
        if !known {
            return Err(PanelError::ButtonNotFound(id.to_string()));
        }
        self.mirror
            .edit(|buttons, order| edit::remove_button(buttons, order, id));
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        self.commit()
    }

    /// # Errors
    /// Returns `PanelError::ButtonNotFound` for an unknown id.
    pub fn set_label(&mut self, id: &str, label: &str) -> Result<()> {
        self.update_button(id, |b| b.label = label.to_string())
    }

    /// Reassign the hotkey combo.
    ///
    /// # Errors
    /// Returns `PanelError::ButtonNotFound` for an unknown id.
    pub fn set_key(&mut self, id: &str, key: &str) -> Result<()> {
        self.update_button(id, |b| b.key = key.to_string())
    }

    /// # Errors
    /// Returns `PanelError::ButtonNotFound` for an unknown id.
    pub fn set_description(&mut self, id: &str, description: &str) -> Result<()> {
        let description = (!description.is_empty()).then(|| description.to_string());
        self.update_button(id, |b| b.description = description)
    }

    pub fn select(&mut self, id: Option<&str>) {
        self.selected = id
            .filter(|id| self.mirror.buttons().contains_key(*id))
            .map(str::to_string);
    }

    /// Change the grid. Sent to the hub with the next save.
    ///
    /// # Errors
    /// Returns `PanelError::Validation` for an unsupported column count or
    /// zero rows.
    pub fn set_grid(&mut self, grid: GridLayout) -> Result<()> {
        if !grid.is_valid() {
            return Err(PanelError::Validation(format!(
                "grid must have {:?} columns and at least one row",
                GridLayout::COLUMN_CHOICES
            )));
        }
        self.mirror.set_grid(grid);
        page::persist_grid(self.store.as_ref(), grid)
    }

    // --- Pages ---

    /// # Errors
    /// Returns an error before the first configuration arrives, or on store failure.
    pub fn create_page(&mut self) -> Result<String> {
        let id = self.book_mut()?.create_page();
        self.commit()?;
        Ok(id)
    }

    /// Switch the active page. Unsaved edits are kept in the outgoing page
    /// but not sent to the hub.
    ///
    /// # Errors
    /// Returns `PanelError::PageNotFound` for an unknown id.
    pub fn switch_page(&mut self, id: &str) -> Result<()> {
        let (buttons, order) = (self.mirror.buttons().clone(), self.mirror.order().to_vec());
        let dirty = self.mirror.is_dirty();
        let book = self.book_mut()?;
        book.store_active(&buttons, &order, dirty);
        book.switch_to(id)?;
        let bound = book.is_active_bound();
        let active = book.active().clone();

        self.mirror.load_page(active.buttons, active.order, bound);
        self.selected = None;
        self.commit()
    }

    /// Delete a page. Refused (returns `false`) for the last page.
    ///
    /// # Errors
    /// Returns `PanelError::PageNotFound` for an unknown id.
    pub fn delete_page(&mut self, id: &str) -> Result<bool> {
        let (buttons, order) = (self.mirror.buttons().clone(), self.mirror.order().to_vec());
        let dirty = self.mirror.is_dirty();
        let book = self.book_mut()?;
        book.store_active(&buttons, &order, dirty);
        let was_active = book.active_id() == id;
        if !book.delete_page(id)? {
            return Ok(false);
        }

        if was_active {
            let bound = book.is_active_bound();
            let active = book.active().clone();
            self.mirror.load_page(active.buttons, active.order, bound);
            self.selected = None;
        }
        self.commit()?;
        Ok(true)
    }

    /// # Errors
    /// Returns `PanelError::PageNotFound` for an unknown id.
    pub fn rename_page(&mut self, id: &str, name: &str) -> Result<bool> {
        if !self.book_mut()?.rename_page(id, name)? {
            debug!("ignoring blank page name");
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }

    fn update_button(&mut self, id: &str, f: impl FnOnce(&mut ButtonConfig)) -> Result<()> {
        self.book_mut()?;
        self.require_button(id)?;
        self.mirror.edit(|buttons, _| {
            if let Some(button) = buttons.get_mut(id) {
                f(button);
            }
        });
        self.commit()
    }

    fn require_button(&self, id: &str) -> Result<()> {
        if self.mirror.buttons().contains_key(id) {
            Ok(())
        } else {
            Err(PanelError::ButtonNotFound(id.to_string()))
        }
    }

    /// Returns the grid capacity if `slot` lies on it.
    fn require_slot(&self, slot: usize) -> Result<usize> {
        let capacity = self.grid().capacity();
        if slot < capacity {
            Ok(capacity)
        } else {
            Err(PanelError::Validation(format!(
                "slot {slot} is outside the {}x{} grid",
                self.grid().cols,
                self.grid().rows
            )))
        }
    }

    fn retain_selection(&mut self) {
        if let Some(id) = &self.selected {
            if !self.mirror.buttons().contains_key(id) {
                self.selected = None;
            }
        }
    }

    fn book_mut(&mut self) -> Result<&mut PageBook> {
        self.pages
            .as_mut()
            .ok_or_else(|| PanelError::Validation("no configuration received from the hub yet".into()))
    }

    /// Write the working copy into the active page and persist everything.
    fn commit(&mut self) -> Result<()> {
        if let Some(book) = self.pages.as_mut() {
            book.store_active(
                self.mirror.buttons(),
                self.mirror.order(),
                self.mirror.is_dirty(),
            );
            book.persist(self.store.as_ref())?;
        }
        Ok(())
    }
}

fn blank_button() -> ButtonConfig {
    ButtonConfig {
        label: "New Button".to_string(),
        key: String::new(),
        description: Some(String::new()),
        icon: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::find_template;
    use crate::protocol::{ButtonMap, ConfigUpdate};
    use crate::store::MemoryStore;

    fn hub_config(ids: &[&str]) -> DeckConfiguration {
        let buttons: ButtonMap = ids
            .iter()
            .map(|id| ((*id).to_string(), ButtonConfig::new(id.to_uppercase(), "")))
            .collect();
        DeckConfiguration {
            buttons,
            grid: Some(GridLayout {
                cols: 4,
                rows: 3,
                gap: 10,
            }),
            ..DeckConfiguration::default()
        }
    }

    fn loaded(ids: &[&str]) -> (Arc<MemoryStore>, Editor) {
        let store = Arc::new(MemoryStore::new());
        let mut editor = Editor::new(store.clone(), GridLayout::default());
        editor
            .on_remote_config(hub_config(ids), Instant::now())
            .unwrap();
        (store, editor)
    }

    fn saved_keys(message: Outbound) -> Vec<String> {
        match message {
            Outbound::UpdateConfig(ConfigUpdate::Replace { buttons, .. }) => {
                buttons.keys().cloned().collect()
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn edits_before_first_config_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut editor = Editor::new(store, GridLayout::default());
        assert!(matches!(editor.add_button(), Err(PanelError::Validation(_))));
    }

    #[test]
    fn first_config_seeds_default_page_and_grid() {
        let (store, editor) = loaded(&["b1", "b2"]);
        let book = editor.pages().unwrap();
        assert_eq!(book.active().name, "Default");
        assert_eq!(book.active().order, ["b1", "b2"]);
        assert_eq!(editor.grid().gap, 10);
        assert_eq!(page::load_grid(store.as_ref()).unwrap().gap, 10);
    }

    #[test]
    fn persisted_pages_win_over_hub_bootstrap() {
        let (store, mut editor) = loaded(&["b1"]);
        let second = editor.create_page().unwrap();
        editor.rename_page(&second, "Media").unwrap();
        drop(editor);

        let mut restored = Editor::new(store, GridLayout::default());
        restored
            .on_remote_config(hub_config(&["x1", "x2"]), Instant::now())
            .unwrap();
        let book = restored.pages().unwrap();
        assert_eq!(book.pages().len(), 2);
        assert_eq!(book.pages()[1].name, "Media");
        // The bound Default page tracks the hub.
        assert_eq!(restored.mirror().order(), ["x1", "x2"]);
    }

    #[test]
    fn every_mutation_is_persisted() {
        let (store, mut editor) = loaded(&["b1"]);
        let id = editor.add_button().unwrap();
        editor.set_label(&id, "Record").unwrap();

        let book = PageBook::load(store.as_ref()).unwrap();
        assert_eq!(book.active().buttons[&id].label, "Record");
        assert_eq!(book.active().order, ["b1", id.as_str()]);
    }

    #[test]
    fn dirty_edits_survive_pushes() {
        let (_, mut editor) = loaded(&["b1", "b2", "b3"]);
        editor.set_label("b1", "One").unwrap();
        editor.set_key("b2", "ctrl+2").unwrap();
        editor.delete_button("b3").unwrap();

        let r = editor
            .on_remote_config(hub_config(&["z"]), Instant::now())
            .unwrap();
        assert_eq!(r.working, WorkingCopy::KeptDirty);
        assert_eq!(editor.mirror().order(), ["b1", "b2"]);
        assert_eq!(editor.mirror().buttons()["b1"].label, "One");
        assert_eq!(editor.mirror().buttons()["b2"].key, "ctrl+2");
    }

    #[test]
    fn delete_clears_selection() {
        let (_, mut editor) = loaded(&["b1", "b2"]);
        editor.select(Some("b2"));
        assert_eq!(editor.selected(), Some("b2"));
        editor.delete_button("b2").unwrap();
        assert_eq!(editor.selected(), None);
        assert!(matches!(
            editor.delete_button("b2"),
            Err(PanelError::ButtonNotFound(_))
        ));
    }

    #[test]
    fn template_drops() {
        let (_, mut editor) = loaded(&["b1", "b2"]);
        editor.set_description("b1", "keep me").unwrap();
        let paste = find_template("paste").unwrap();

        let id = editor
            .drop_template(&DropTarget::Button("b1".into()), paste)
            .unwrap();
        assert_eq!(id, "b1");
        let b1 = &editor.mirror().buttons()["b1"];
        assert_eq!((b1.label.as_str(), b1.key.as_str()), ("Paste", "ctrl+v"));
        assert_eq!(b1.description.as_deref(), Some("keep me"));

        let new_id = editor.drop_template(&DropTarget::Cell(0), paste).unwrap();
        assert_eq!(editor.mirror().order()[0], new_id);

        assert!(matches!(
            editor.drop_template(&DropTarget::Button("ghost".into()), paste),
            Err(PanelError::ButtonNotFound(_))
        ));
    }

    #[test]
    fn switch_page_keeps_unsaved_edits_locally() {
        let (_, mut editor) = loaded(&["b1"]);
        let default = editor.pages().unwrap().active_id().to_string();
        editor.set_label("b1", "Edited").unwrap();
        let second = editor.create_page().unwrap();

        editor.switch_page(&second).unwrap();
        assert!(!editor.is_dirty());
        assert!(editor.mirror().order().is_empty());
        assert!(!editor.mirror().is_bound());

        // A push for the hub's page must not land on this one.
        editor
            .on_remote_config(hub_config(&["q"]), Instant::now())
            .unwrap();
        assert!(editor.mirror().order().is_empty());

        editor.switch_page(&default).unwrap();
        assert_eq!(editor.mirror().buttons()["b1"].label, "Edited");
    }

    #[test]
    fn save_binds_active_page() {
        let (_, mut editor) = loaded(&["b1"]);
        let second = editor.create_page().unwrap();
        editor.switch_page(&second).unwrap();
        editor.add_button().unwrap();

        let now = Instant::now();
        let keys = saved_keys(editor.request_save(now).unwrap());
        assert_eq!(keys, ["button1"]);
        assert_eq!(editor.pages().unwrap().hub_page(), Some(second.as_str()));

        assert!(matches!(
            editor.request_save(now),
            Err(PanelError::SaveInFlight)
        ));
        assert_eq!(
            editor.poll(now + Duration::from_millis(400)).unwrap(),
            Some(SaveAck::Timeout)
        );
        assert!(!editor.is_dirty());
    }

    #[test]
    fn page_deletion_rules() {
        let (_, mut editor) = loaded(&["b1"]);
        let only = editor.pages().unwrap().active_id().to_string();
        assert!(!editor.delete_page(&only).unwrap());

        let second = editor.create_page().unwrap();
        editor.switch_page(&second).unwrap();
        assert!(editor.delete_page(&second).unwrap());
        assert_eq!(editor.pages().unwrap().active_id(), only);
        assert_eq!(editor.mirror().order(), ["b1"]);
    }

    #[test]
    fn grid_validation() {
        let (_, mut editor) = loaded(&[]);
        assert!(editor
            .set_grid(GridLayout {
                cols: 8,
                rows: 2,
                gap: 0
            })
            .is_err());
        editor
            .set_grid(GridLayout {
                cols: 6,
                rows: 2,
                gap: 0,
            })
            .unwrap();
        assert_eq!(editor.grid().capacity(), 12);
        assert!(editor.is_dirty());
    }

    #[test]
    fn insert_respects_capacity() {
        let ids: Vec<String> = (1..=12).map(|i| format!("b{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (_, mut editor) = loaded(&refs);

        let id = editor.insert_button(11).unwrap();
        let order = editor.mirror().order();
        assert_eq!(order.len(), 12);
        assert_eq!(order[11], id);
        // b12 is pushed off the grid but kept as an orphan until saved.
        assert!(editor.mirror().buttons().contains_key("b12"));
        let keys = saved_keys(editor.request_save(Instant::now()).unwrap());
        assert!(!keys.contains(&"b12".to_string()));
    }

    #[test]
    fn slots_outside_the_grid_are_rejected() {
        let ids: Vec<String> = (1..=12).map(|i| format!("b{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (store, mut editor) = loaded(&refs);
        let copy = find_template("copy").unwrap();

        assert!(matches!(
            editor.drop_template(&DropTarget::Cell(12), copy),
            Err(PanelError::Validation(_))
        ));
        assert!(matches!(
            editor.insert_button(40),
            Err(PanelError::Validation(_))
        ));
        assert!(!editor.is_dirty());
        assert_eq!(editor.mirror().buttons().len(), 12);
        assert_eq!(editor.mirror().order(), ids.as_slice());
        let book = PageBook::load(store.as_ref()).unwrap();
        assert_eq!(book.active().order.len(), 12);
    }

    #[test]
    fn unsaved_edits_survive_restart() {
        let (store, mut editor) = loaded(&["b1"]);
        editor.set_label("b1", "Edited").unwrap();
        drop(editor);
        assert!(PageBook::load(store.as_ref()).unwrap().active().unsaved);

        let mut restored = Editor::new(store.clone(), GridLayout::default());
        assert!(restored.is_dirty());
        let r = restored
            .on_remote_config(hub_config(&["b1"]), Instant::now())
            .unwrap();
        assert_eq!(r.working, WorkingCopy::KeptDirty);
        assert_eq!(restored.mirror().buttons()["b1"].label, "Edited");

        let now = Instant::now();
        restored.request_save(now).unwrap();
        restored
            .on_remote_config(hub_config(&["b1"]), now + Duration::from_millis(50))
            .unwrap();
        assert!(!restored.is_dirty());
        assert!(!PageBook::load(store.as_ref()).unwrap().active().unsaved);
    }

    #[test]
    fn invalid_hub_grid_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let mut editor = Editor::new(store.clone(), GridLayout::default());
        let mut config = hub_config(&["b1", "b2"]);
        config.grid = Some(GridLayout {
            cols: 0,
            rows: 0,
            gap: 0,
        });
        let r = editor.on_remote_config(config, Instant::now()).unwrap();
        assert!(!r.grid_applied);
        assert_eq!(editor.grid(), GridLayout::default());
        assert_eq!(page::load_grid(store.as_ref()), None);

        editor.insert_button(0).unwrap();
        assert_eq!(editor.mirror().order().len(), 3);
    }
}
