pub mod machine;
pub mod transport;

pub use machine::{ConnectionState, RECONNECT_DELAY};
pub use transport::{Connector, Transport, WsConnector};

use crate::error::Result;
use crate::event::PanelEvent;
use crate::protocol::{ConfigUpdate, Outbound};
use crate::session::{SessionContext, SessionStore};
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use machine::{Command, Input, Machine, Notice, Step};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared, lock-free view of the current connection state.
pub type StatusHandle = Arc<ArcSwap<ConnectionState>>;

/// Cloneable handle for queueing messages to the hub.
///
/// Messages are dropped if the link is not open when they reach the manager;
/// callers gate on the status being `connected`.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    pub fn send(&self, message: Outbound) {
        if self.tx.send(message).is_err() {
            debug!("connection manager gone, message dropped");
        }
    }

    pub fn trigger_key(&self, button_id: &str) {
        self.send(Outbound::TriggerKey {
            button_id: button_id.to_string(),
        });
    }

    pub fn update_button(
        &self,
        button_id: &str,
        key: &str,
        label: Option<String>,
        description: Option<String>,
    ) {
        self.send(Outbound::UpdateConfig(ConfigUpdate::Button {
            button_id: button_id.to_string(),
            key: key.to_string(),
            label,
            description,
        }));
    }
}

/// Owns the one logical session with the hub: opens the link, joins the room,
/// republishes pushes as [`PanelEvent`]s and reconnects after a fixed delay.
pub struct ConnectionManager {
    ctx: SessionContext,
    session: Arc<SessionStore>,
    connector: Arc<dyn Connector>,
    tx: broadcast::Sender<PanelEvent>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
    status: StatusHandle,
    outbox_tx: mpsc::UnboundedSender<Outbound>,
    outbox_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl ConnectionManager {
    pub fn new(
        ctx: SessionContext,
        session: Arc<SessionStore>,
        connector: Arc<dyn Connector>,
        tx: broadcast::Sender<PanelEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            session,
            connector,
            tx,
            cancel,
            reconnect_delay: RECONNECT_DELAY,
            status: Arc::new(ArcSwap::from_pointee(ConnectionState::Connecting)),
            outbox_tx,
            outbox_rx,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn outbox(&self) -> Outbox {
        Outbox {
            tx: self.outbox_tx.clone(),
        }
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Run until cancelled or until the hub rejects our credentials.
    ///
    /// # Errors
    /// Currently never fails; transport errors are handled by reconnecting.
    pub async fn run(self) -> Result<()> {
        let Self {
            ctx,
            session,
            connector,
            tx,
            cancel,
            reconnect_delay,
            status,
            outbox_tx: _outbox_tx,
            outbox_rx: mut outbox,
        } = self;

        info!("connecting to {} as {}", ctx.url, ctx.role.as_str());
        let mut machine = Machine::new(ctx.role, ctx.token.clone(), reconnect_delay);
        let mut driver = Driver {
            url: ctx.url,
            connector,
            session,
            tx,
            status,
            link: Link::Idle,
            timer: None,
        };

        let step = machine.start();
        driver.apply(step);

        loop {
            let input = tokio::select! {
                biased;
                () = cancel.cancelled() => Input::Teardown,
                Some(message) = outbox.recv() => {
                    if let Some(command) = machine.send(&message) {
                        driver.execute(command);
                    }
                    continue;
                }
                input = next_link_input(&mut driver.link) => input,
                () = reconnect_due(&mut driver.timer) => Input::ReconnectDue,
            };

            let teardown = input == Input::Teardown;
            let step = machine.handle(input);
            driver.apply(step);

            if teardown {
                info!("connection manager torn down");
                break;
            }
            if machine.state() == ConnectionState::Unauthorized {
                info!("connection manager stopped: unauthorized");
                break;
            }
        }

        Ok(())
    }
}

enum Link {
    Idle,
    Opening(BoxFuture<'static, Result<Transport>>),
    Open(Transport),
}

struct Driver {
    url: String,
    connector: Arc<dyn Connector>,
    session: Arc<SessionStore>,
    tx: broadcast::Sender<PanelEvent>,
    status: StatusHandle,
    link: Link,
    timer: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    fn apply(&mut self, step: Step) {
        // Commands first: `connected` is only published once the join is on the wire.
        for command in step.commands {
            self.execute(command);
        }
        for notice in step.notices {
            self.publish(notice);
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Open => {
                // Replacing the link drops (and so closes) any previous one.
                self.link = Link::Opening(self.connector.connect(&self.url));
            }
            Command::Send(text) => match &self.link {
                Link::Open(transport) => {
                    if !transport.send(text) {
                        debug!("link closed under us, frame dropped");
                    }
                }
                _ => debug!("no open link, frame dropped"),
            },
            Command::Close => self.link = Link::Idle,
            Command::ArmReconnect(delay) => {
                self.timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Command::CancelReconnect => self.timer = None,
            Command::PurgeCredentials => {
                if let Err(e) = self.session.purge() {
                    error!("failed to purge credentials: {e}");
                }
            }
        }
    }

    fn publish(&self, notice: Notice) {
        let event = match notice {
            Notice::Status(state) => {
                self.status.store(Arc::new(state));
                PanelEvent::StatusChanged(state)
            }
            Notice::Config(config, source) => PanelEvent::ConfigReceived {
                config: Arc::new(config),
                source,
            },
            Notice::ListenerStatus(connected) => PanelEvent::ListenerStatus(connected),
            Notice::RoomJoined(role) => PanelEvent::RoomJoined(role),
            Notice::TriggerAcked { button_id, key } => {
                PanelEvent::TriggerAcked { button_id, key }
            }
            Notice::ServerError(message) => PanelEvent::ServerError(message),
            Notice::Unauthorized => PanelEvent::Unauthorized,
        };
        let _ = self.tx.send(event);
    }
}

async fn next_link_input(link: &mut Link) -> Input {
    match link {
        Link::Idle => std::future::pending().await,
        Link::Opening(connecting) => match connecting.await {
            Ok(transport) => {
                *link = Link::Open(transport);
                Input::Opened
            }
            Err(e) => {
                warn!("{e}");
                *link = Link::Idle;
                Input::Closed
            }
        },
        Link::Open(transport) => match transport.recv().await {
            Some(text) => Input::Frame(text),
            None => {
                *link = Link::Idle;
                Input::Closed
            }
        },
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => {
            sleep.as_mut().await;
            *timer = None;
        }
        None => std::future::pending().await,
    }
}
