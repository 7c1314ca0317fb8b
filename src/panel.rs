use crate::config::schema::{PanelConfig, PanelSettings};
use crate::connection::{ConnectionManager, ConnectionState, Connector, Outbox, WsConnector};
use crate::editor::Editor;
use crate::error::{PanelError, Result};
use crate::event::PanelEvent;
use crate::protocol::{ClientRole, DeckConfiguration};
use crate::session::SessionStore;
use crate::store::{FileStore, KvStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// What a panel session is for. Each task decides when the session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Follow the hub until interrupted, keeping local pages in sync.
    Watch,
    /// Press one button as the deck UI would, then exit on acknowledgement.
    Trigger(String),
    /// Save the active page to the hub, then exit on acknowledgement.
    Push,
    /// Change one button directly on the hub, then exit once a pushed
    /// configuration shows the change.
    Patch(ButtonPatch),
}

impl Task {
    fn role(&self) -> ClientRole {
        match self {
            Self::Trigger(_) => ClientRole::ButtonUi,
            Self::Watch | Self::Push | Self::Patch(_) => ClientRole::Admin,
        }
    }
}

/// A single-button `update_config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPatch {
    pub button_id: String,
    pub key: String,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl ButtonPatch {
    fn is_applied(&self, config: &DeckConfiguration) -> bool {
        config.buttons.get(&self.button_id).is_some_and(|button| {
            button.key == self.key
                && self.label.as_ref().map_or(true, |l| *l == button.label)
                && self
                    .description
                    .as_ref()
                    .map_or(true, |d| button.description.as_ref() == Some(d))
        })
    }
}

/// Open the persistent store named by the settings, or the default one.
///
/// # Errors
/// Returns `PanelError::Io` if the store file exists but cannot be read.
pub fn open_store(settings: &PanelSettings) -> Result<Arc<dyn KvStore>> {
    let path = settings
        .store_path
        .clone()
        .unwrap_or_else(FileStore::default_path);
    Ok(Arc::new(FileStore::open(&path)?))
}

pub fn session_store(settings: &PanelSettings, store: Arc<dyn KvStore>) -> SessionStore {
    SessionStore::new(store)
        .with_override(settings.override_url())
        .with_origin(settings.origin.clone())
        .with_default_port(settings.hub_default_port)
}

pub fn editor(config: &PanelConfig, store: Arc<dyn KvStore>) -> Editor {
    Editor::new(store, config.grid).with_timings(
        config.panel.save_ack_timeout(),
        config.panel.saved_indicator(),
    )
}

/// Run a task against the configured hub until it completes or Ctrl-C.
///
/// # Errors
/// Returns `PanelError::NeedsOnboarding` without a hub address,
/// `PanelError::Unauthorized` if the hub rejects the token, or a store error.
pub async fn run(config: &PanelConfig, task: Task) -> Result<()> {
    let store = open_store(&config.panel)?;
    let session = Arc::new(session_store(&config.panel, store.clone()));
    let mut panel = Panel::new(session, Arc::new(WsConnector), editor(config, store))
        .with_reconnect_delay(config.panel.reconnect_delay());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, shutting down");
            signal_cancel.cancel();
        }
    });

    panel.run(&task, &cancel).await
}

/// One client session: a connection manager feeding an editor.
pub struct Panel {
    session: Arc<SessionStore>,
    connector: Arc<dyn Connector>,
    editor: Editor,
    reconnect_delay: Duration,
}

impl Panel {
    pub fn new(session: Arc<SessionStore>, connector: Arc<dyn Connector>, editor: Editor) -> Self {
        Self {
            session,
            connector,
            editor,
            reconnect_delay: crate::connection::RECONNECT_DELAY,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut Editor {
        &mut self.editor
    }

    /// Connect and process hub events until `task` is done or `cancel` fires.
    ///
    /// # Errors
    /// Returns `PanelError::NeedsOnboarding` if no hub address resolves,
    /// `PanelError::Unauthorized` if the hub rejects the token, or the error
    /// that ended the task.
    pub async fn run(&mut self, task: &Task, cancel: &CancellationToken) -> Result<()> {
        let ctx = self.session.context(task.role())?;
        let (tx, mut rx) = broadcast::channel::<PanelEvent>(CHANNEL_CAPACITY);
        let manager_cancel = cancel.child_token();
        let manager = ConnectionManager::new(
            ctx,
            self.session.clone(),
            self.connector.clone(),
            tx.clone(),
            manager_cancel.clone(),
        )
        .with_reconnect_delay(self.reconnect_delay);
        let mut state = SessionState {
            task,
            editor: &mut self.editor,
            outbox: manager.outbox(),
            pending: false,
        };
        let manager_handle = tokio::spawn(manager.run());

        info!("panel running: {task:?}");

        let result = loop {
            let deadline = state.editor.next_deadline();
            let event = tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                () = sleep_until(deadline) => {
                    match state.on_tick(Instant::now()) {
                        Ok(false) => continue,
                        Ok(true) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                event = rx.recv() => {
                    match event {
                        Ok(e) => e,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("event loop lagged, missed {n} events");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break Ok(()),
                    }
                }
            };

            match state.handle_event(event) {
                Ok(false) => {}
                Ok(true) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        info!("panel shutting down...");
        manager_cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), manager_handle).await;

        info!("panel stopped");
        result
    }
}

struct SessionState<'a> {
    task: &'a Task,
    editor: &'a mut Editor,
    outbox: Outbox,
    /// The task's request went out and waits for acknowledgement.
    pending: bool,
}

impl SessionState<'_> {
    /// Handle a single event. Returns `true` once the task is complete.
    fn handle_event(&mut self, event: PanelEvent) -> Result<bool> {
        match event {
            PanelEvent::StatusChanged(state) => {
                info!("hub {state}");
                if state == ConnectionState::Connected && !self.pending {
                    match self.task {
                        Task::Trigger(button_id) => {
                            info!("triggering {button_id}");
                            self.outbox.trigger_key(button_id);
                            self.pending = true;
                        }
                        Task::Patch(patch) => {
                            info!("updating {} on the hub", patch.button_id);
                            self.outbox.update_button(
                                &patch.button_id,
                                &patch.key,
                                patch.label.clone(),
                                patch.description.clone(),
                            );
                            self.pending = true;
                        }
                        Task::Watch | Task::Push => {}
                    }
                }
            }

            PanelEvent::ConfigReceived { config, source } => {
                info!(
                    "config {source:?}: {} buttons, debounce {} ms, remote config {}",
                    config.buttons.len(),
                    config.settings.debounce_ms,
                    if config.settings.allow_remote_config {
                        "allowed"
                    } else {
                        "disabled"
                    }
                );
                let reconciled = self
                    .editor
                    .on_remote_config(config.as_ref().clone(), Instant::now())?;
                debug!("working copy: {:?}", reconciled.working);

                if let Task::Patch(patch) = self.task {
                    if self.pending && patch.is_applied(&config) {
                        info!("{} updated", patch.button_id);
                        return Ok(true);
                    }
                }

                if let Task::Push = self.task {
                    if self.pending {
                        if let Some(ack) = reconciled.ack {
                            info!("push acknowledged ({ack:?})");
                            return Ok(true);
                        }
                    } else {
                        let message = self.editor.request_save(Instant::now())?;
                        info!(
                            "pushing {} buttons",
                            self.editor.mirror().flatten().len()
                        );
                        self.outbox.send(message);
                        self.pending = true;
                    }
                }
            }

            PanelEvent::ListenerStatus(connected) => {
                info!(
                    "desktop listener {}",
                    if connected { "connected" } else { "disconnected" }
                );
            }

            PanelEvent::RoomJoined(role) => debug!("joined as {role}"),

            PanelEvent::TriggerAcked { button_id, key } => {
                info!("hub pressed '{key}' for {button_id}");
                if matches!(self.task, Task::Trigger(id) if *id == button_id) {
                    return Ok(true);
                }
            }

            PanelEvent::ServerError(message) => {
                warn!("hub error: {message}");
                if self.pending && !matches!(self.task, Task::Watch) {
                    return Err(PanelError::Transport(message));
                }
            }

            PanelEvent::Unauthorized => return Err(PanelError::Unauthorized),
        }

        Ok(false)
    }

    /// Advance save timers. Returns `true` if this completed a push.
    fn on_tick(&mut self, now: Instant) -> Result<bool> {
        match self.editor.poll(now)? {
            Some(ack) if self.pending && *self.task == Task::Push => {
                info!("push acknowledged ({ack:?})");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
