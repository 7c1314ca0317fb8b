//! Grid placement operations on a page's button map and slot order.
//!
//! `order` is a row-major sequence of ids over `cols × rows` slots. None of
//! these functions delete orphans; ids pushed off the grid stay in the map.

use crate::protocol::{ButtonConfig, ButtonMap};
use tracing::debug;

/// A canned hotkey that can be dropped onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyTemplate {
    pub label: &'static str,
    pub key: &'static str,
}

const fn template(label: &'static str, key: &'static str) -> HotkeyTemplate {
    HotkeyTemplate { label, key }
}

/// Common system hotkeys offered in the editor palette.
pub const SYSTEM_HOTKEYS: &[HotkeyTemplate] = &[
    template("Copy", "ctrl+c"),
    template("Paste", "ctrl+v"),
    template("Cut", "ctrl+x"),
    template("Undo", "ctrl+z"),
    template("Redo", "ctrl+shift+z"),
    template("Select All", "ctrl+a"),
    template("Save", "ctrl+s"),
    template("Find", "ctrl+f"),
    template("Screenshot", "printscreen"),
    template("Lock Screen", "cmd+l"),
    template("Switch Window", "alt+tab"),
    template("Close Window", "alt+f4"),
    template("New Tab", "ctrl+t"),
    template("Mute", "audiomute"),
    template("Play / Pause", "audioplay"),
    template("Next Track", "audionext"),
    template("Previous Track", "audioprev"),
    template("Volume Up", "audiovolumeup"),
    template("Volume Down", "audiovolumedown"),
];

/// Look up a system hotkey by label, case-insensitively.
pub fn find_template(label: &str) -> Option<&'static HotkeyTemplate> {
    SYSTEM_HOTKEYS
        .iter()
        .find(|t| t.label.eq_ignore_ascii_case(label.trim()))
}

/// Where something was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// A grid cell, by zero-based slot index.
    Cell(usize),
    /// An existing button tile.
    Button(String),
}

/// Next free `button{N}` id, starting at N = count + 1.
pub fn next_button_id(buttons: &ButtonMap, order: &[String]) -> String {
    let mut n = buttons.len().max(order.len()) + 1;
    loop {
        let id = format!("button{n}");
        if !buttons.contains_key(&id) && !order.contains(&id) {
            return id;
        }
        n += 1;
    }
}

/// Insert `id` at `slot`, shifting later entries right, then cut the order
/// back to `capacity`. Returns the ids that fell off the end.
pub fn insert_at(order: &mut Vec<String>, id: String, slot: usize, capacity: usize) -> Vec<String> {
    let index = slot.min(order.len());
    order.insert(index, id);
    if order.len() > capacity {
        let dropped = order.split_off(capacity);
        debug!("grid full, pushed off: {dropped:?}");
        dropped
    } else {
        Vec::new()
    }
}

/// Move the entry at `from` to `to`: remove, then reinsert. Entries in
/// between shift by one. Returns `false` if either index is out of range.
pub fn move_slot(order: &mut Vec<String>, from: usize, to: usize) -> bool {
    if from >= order.len() || to >= order.len() {
        return false;
    }
    if from != to {
        let id = order.remove(from);
        order.insert(to, id);
    }
    true
}

/// Drag `active` onto `over`'s position.
pub fn move_button(order: &mut Vec<String>, active: &str, over: &str) -> bool {
    if active == over {
        return false;
    }
    let (Some(from), Some(to)) = (
        order.iter().position(|id| id == active),
        order.iter().position(|id| id == over),
    ) else {
        return false;
    };
    move_slot(order, from, to)
}

/// Drop a system hotkey. Onto a button, only its label and key change. Onto
/// a cell, a new button is inserted at that slot. Returns the affected id.
pub fn drop_template(
    buttons: &mut ButtonMap,
    order: &mut Vec<String>,
    target: &DropTarget,
    template: &HotkeyTemplate,
    capacity: usize,
) -> Option<String> {
    match target {
        DropTarget::Button(id) => {
            let button = buttons.get_mut(id)?;
            button.label = template.label.to_string();
            button.key = template.key.to_string();
            Some(id.clone())
        }
        DropTarget::Cell(slot) => {
            let id = next_button_id(buttons, order);
            buttons.insert(id.clone(), ButtonConfig::new(template.label, template.key));
            insert_at(order, id.clone(), *slot, capacity);
            Some(id)
        }
    }
}

/// Remove a button from both the map and the order.
pub fn remove_button(buttons: &mut ButtonMap, order: &mut Vec<String>, id: &str) -> bool {
    let in_map = buttons.shift_remove(id).is_some();
    let before = order.len();
    order.retain(|entry| entry != id);
    in_map || order.len() != before
}
