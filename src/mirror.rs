//! Local, editable copy of the hub configuration.
//!
//! While clean, every configuration the hub pushes replaces the working copy.
//! Once an edit lands the mirror is dirty and pushes only update the remote
//! snapshot, so a concurrent save from elsewhere cannot wipe unsaved work.
//! Saving is two-phase: [`ConfigMirror::request_save`] produces the single
//! `update_config` message, and the save is acknowledged by the next pushed
//! configuration or, failing that, by a short timeout.

use crate::error::{PanelError, Result};
use crate::protocol::{
    ButtonConfig, ButtonMap, ConfigUpdate, DeckConfiguration, GridLayout, Outbound,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fallback acknowledgement when the hub's echo does not arrive.
pub const SAVE_ACK_TIMEOUT: Duration = Duration::from_millis(400);

/// How long the "saved" indicator stays up.
pub const SAVED_INDICATOR: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveIndicator {
    Idle,
    Saving,
    Saved,
}

/// What acknowledged a pending save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAck {
    Echo,
    Timeout,
}

/// What an inbound configuration did to the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingCopy {
    Replaced,
    /// Kept because it holds unsaved edits.
    KeptDirty,
    /// Kept because it shows a page the hub does not hold.
    KeptUnbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub working: WorkingCopy,
    pub ack: Option<SaveAck>,
    pub grid_applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SavePhase {
    Idle,
    Pending { requested_at: Instant, revision: u64 },
    Saved { at: Instant },
}

pub struct ConfigMirror {
    remote: Option<DeckConfiguration>,
    buttons: ButtonMap,
    order: Vec<String>,
    grid: GridLayout,
    grid_from_hub: bool,
    dirty: bool,
    bound: bool,
    revision: u64,
    phase: SavePhase,
    ack_timeout: Duration,
    indicator_for: Duration,
}

impl ConfigMirror {
    pub fn new(grid: GridLayout) -> Self {
        Self {
            remote: None,
            buttons: ButtonMap::new(),
            order: Vec::new(),
            grid,
            grid_from_hub: false,
            dirty: false,
            bound: true,
            revision: 0,
            phase: SavePhase::Idle,
            ack_timeout: SAVE_ACK_TIMEOUT,
            indicator_for: SAVED_INDICATOR,
        }
    }

    #[must_use]
    pub fn with_timings(mut self, ack_timeout: Duration, indicator_for: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self.indicator_for = indicator_for;
        self
    }

    pub fn buttons(&self) -> &ButtonMap {
        &self.buttons
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn grid(&self) -> GridLayout {
        self.grid
    }

    pub fn remote(&self) -> Option<&DeckConfiguration> {
        self.remote.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the working copy is the page the hub currently holds.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_saving(&self) -> bool {
        matches!(self.phase, SavePhase::Pending { .. })
    }

    /// Buttons in slot order. Orphans on either side are skipped.
    pub fn visible(&self) -> Vec<(&str, &ButtonConfig)> {
        self.order
            .iter()
            .filter_map(|id| self.buttons.get_key_value(id))
            .map(|(id, button)| (id.as_str(), button))
            .collect()
    }

    /// The button map a save sends: `order ∩ keys(buttons)`, in slot order.
    pub fn flatten(&self) -> ButtonMap {
        let mut flat = ButtonMap::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(button) = self.buttons.get(id) {
                flat.insert(id.clone(), button.clone());
            }
        }
        flat
    }

    /// Swap in another page's contents, abandoning the current edit session.
    pub fn load_page(&mut self, buttons: ButtonMap, order: Vec<String>, bound: bool) {
        self.buttons = buttons;
        self.order = order;
        self.bound = bound;
        self.dirty = false;
        self.revision += 1;
    }

    /// Apply a local edit to the working copy and mark it dirty.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut ButtonMap, &mut Vec<String>) -> R) -> R {
        let result = f(&mut self.buttons, &mut self.order);
        self.touch();
        result
    }

    /// Resume an edit session restored from storage.
    pub fn mark_dirty(&mut self) {
        self.touch();
    }

    pub fn set_grid(&mut self, grid: GridLayout) {
        self.grid = grid;
        self.touch();
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    /// Reconcile a configuration pushed by the hub.
    pub fn apply_remote(&mut self, config: DeckConfiguration, now: Instant) -> Reconciled {
        let ack = self
            .is_saving()
            .then(|| self.acknowledge(SaveAck::Echo, now));

        let mut grid_applied = false;
        let working = if self.dirty {
            debug!("unsaved edits pending, keeping working copy");
            WorkingCopy::KeptDirty
        } else {
            if !self.grid_from_hub {
                match config.grid {
                    Some(grid) if grid.is_valid() => {
                        self.grid = grid;
                        self.grid_from_hub = true;
                        grid_applied = true;
                    }
                    Some(grid) => warn!(
                        "ignoring unsupported hub grid {}x{}",
                        grid.cols, grid.rows
                    ),
                    None => {}
                }
            }
            if self.bound {
                self.buttons = config.buttons.clone();
                self.order = self.buttons.keys().cloned().collect();
                WorkingCopy::Replaced
            } else {
                WorkingCopy::KeptUnbound
            }
        };

        self.remote = Some(config);
        Reconciled {
            working,
            ack,
            grid_applied,
        }
    }

    /// Start a save. At most one save is outstanding at a time.
    ///
    /// # Errors
    /// Returns `PanelError::SaveInFlight` if an earlier save is unacknowledged.
    pub fn request_save(&mut self, now: Instant) -> Result<Outbound> {
        if self.is_saving() {
            return Err(PanelError::SaveInFlight);
        }

        let buttons = self.flatten();
        info!(
            "saving {} buttons ({} orphaned entries dropped)",
            buttons.len(),
            self.order.len().saturating_sub(buttons.len())
        );
        self.phase = SavePhase::Pending {
            requested_at: now,
            revision: self.revision,
        };
        self.bound = true;
        Ok(Outbound::UpdateConfig(ConfigUpdate::Replace {
            buttons,
            grid: Some(self.grid),
        }))
    }

    /// Advance timers. Returns an acknowledgement if the fallback fired.
    pub fn poll(&mut self, now: Instant) -> Option<SaveAck> {
        match self.phase {
            SavePhase::Pending { requested_at, .. } if now >= requested_at + self.ack_timeout => {
                Some(self.acknowledge(SaveAck::Timeout, now))
            }
            SavePhase::Saved { at } if now >= at + self.indicator_for => {
                self.phase = SavePhase::Idle;
                None
            }
            _ => None,
        }
    }

    /// When [`ConfigMirror::poll`] next has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            SavePhase::Idle => None,
            SavePhase::Pending { requested_at, .. } => Some(requested_at + self.ack_timeout),
            SavePhase::Saved { at } => Some(at + self.indicator_for),
        }
    }

    pub fn save_indicator(&self) -> SaveIndicator {
        match self.phase {
            SavePhase::Idle => SaveIndicator::Idle,
            SavePhase::Pending { .. } => SaveIndicator::Saving,
            SavePhase::Saved { .. } => SaveIndicator::Saved,
        }
    }

    fn acknowledge(&mut self, via: SaveAck, now: Instant) -> SaveAck {
        if let SavePhase::Pending { revision, .. } = self.phase {
            if revision == self.revision {
                self.dirty = false;
            } else {
                debug!("edits made after save request, staying dirty");
            }
        }
        info!("save acknowledged ({via:?})");
        self.phase = SavePhase::Saved { at: now };
        via
    }
}
