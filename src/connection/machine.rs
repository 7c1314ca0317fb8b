//! Connection lifecycle as a plain state machine.
//!
//! The machine never touches I/O. Each input returns a [`Step`] listing the
//! commands the driver must carry out and the events to publish, so every
//! transition can be tested without sockets or real time.

use crate::event::ConfigSource;
use crate::protocol::{ClientRole, DeckConfiguration, Inbound, Outbound};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before a dropped connection is retried.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// The hub rejected our token. Terminal for this session.
    Unauthorized,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Unauthorized => "unauthorized",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the link.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Opened,
    Frame(String),
    /// The link closed, or never opened.
    Closed,
    ReconnectDue,
    Teardown,
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a fresh transport, discarding any previous one.
    Open,
    Send(String),
    Close,
    ArmReconnect(Duration),
    CancelReconnect,
    PurgeCredentials,
}

/// What the rest of the panel gets told.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Status(ConnectionState),
    Config(DeckConfiguration, ConfigSource),
    ListenerStatus(bool),
    RoomJoined(String),
    TriggerAcked { button_id: String, key: String },
    ServerError(String),
    Unauthorized,
}

#[derive(Debug, Default, PartialEq)]
pub struct Step {
    pub commands: Vec<Command>,
    pub notices: Vec<Notice>,
}

impl Step {
    fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    fn notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }
}

pub struct Machine {
    state: ConnectionState,
    role: ClientRole,
    token: Option<String>,
    reconnect_delay: Duration,
    mounted: bool,
    open: bool,
    timer_armed: bool,
    listener_connected: bool,
}

impl Machine {
    pub fn new(role: ClientRole, token: Option<String>, reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Connecting,
            role,
            token,
            reconnect_delay,
            mounted: true,
            open: false,
            timer_armed: false,
            listener_connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// First step after construction: the machine starts out connecting.
    pub fn start(&mut self) -> Step {
        if !self.mounted {
            return Step::default();
        }
        Step::default()
            .notice(Notice::Status(ConnectionState::Connecting))
            .command(Command::Open)
    }

    pub fn handle(&mut self, input: Input) -> Step {
        if !self.mounted {
            debug!("ignoring {input:?} after teardown");
            return Step::default();
        }

        match input {
            Input::Opened => self.on_opened(),
            Input::Frame(text) => self.on_frame(&text),
            Input::Closed => self.on_closed(),
            Input::ReconnectDue => self.on_reconnect_due(),
            Input::Teardown => self.on_teardown(),
        }
    }

    /// Encode an outbound message if the link can carry it. Sends while the
    /// link is not open are dropped, not queued.
    pub fn send(&self, message: &Outbound) -> Option<Command> {
        if !self.mounted || !self.open {
            debug!("dropping {} while {}", message.event_name(), self.state);
            return None;
        }
        match message.encode() {
            Ok(text) => Some(Command::Send(text)),
            Err(e) => {
                warn!("failed to encode {}: {e}", message.event_name());
                None
            }
        }
    }

    fn on_opened(&mut self) -> Step {
        if self.state != ConnectionState::Connecting {
            return Step::default().command(Command::Close);
        }
        self.state = ConnectionState::Connected;
        self.open = true;
        info!("connected, joining as {}", self.role.as_str());

        let join = Outbound::JoinRoom {
            role: self.role,
            token: self.token.clone(),
        };
        let step = Step::default().notice(Notice::Status(ConnectionState::Connected));
        match self.send(&join) {
            Some(command) => step.command(command),
            None => step,
        }
    }

    fn on_frame(&mut self, text: &str) -> Step {
        if !self.open {
            return Step::default();
        }
        let Some(message) = Inbound::parse(text) else {
            return Step::default();
        };

        match message {
            Inbound::ConfigLoaded(config) => {
                Step::default().notice(Notice::Config(config, ConfigSource::Loaded))
            }
            Inbound::ConfigUpdated(config) => {
                Step::default().notice(Notice::Config(config, ConfigSource::Updated))
            }
            Inbound::ListenerStatus { connected } => {
                self.listener_connected = connected;
                Step::default().notice(Notice::ListenerStatus(connected))
            }
            Inbound::RoomJoined { role } => Step::default().notice(Notice::RoomJoined(role)),
            Inbound::TriggerKeyAck { button_id, key } => {
                Step::default().notice(Notice::TriggerAcked { button_id, key })
            }
            Inbound::Error { message } => Step::default().notice(Notice::ServerError(
                message.unwrap_or_else(|| "unknown error".into()),
            )),
            Inbound::AuthError { message } => {
                warn!(
                    "hub rejected credentials: {}",
                    message.as_deref().unwrap_or("auth_error")
                );
                self.state = ConnectionState::Unauthorized;
                self.open = false;
                let mut step = Step::default();
                if self.timer_armed {
                    self.timer_armed = false;
                    step = step.command(Command::CancelReconnect);
                }
                step.command(Command::Close)
                    .command(Command::PurgeCredentials)
                    .notice(Notice::Status(ConnectionState::Unauthorized))
                    .notice(Notice::Unauthorized)
            }
        }
    }

    fn on_closed(&mut self) -> Step {
        match self.state {
            ConnectionState::Unauthorized | ConnectionState::Disconnected => {
                return Step::default();
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        self.state = ConnectionState::Disconnected;
        self.open = false;
        info!(
            "disconnected, retrying in {}ms",
            self.reconnect_delay.as_millis()
        );

        let mut step = Step::default()
            .command(Command::Close)
            .notice(Notice::Status(ConnectionState::Disconnected));
        if self.listener_connected {
            self.listener_connected = false;
            step = step.notice(Notice::ListenerStatus(false));
        }
        if !self.timer_armed {
            self.timer_armed = true;
            step = step.command(Command::ArmReconnect(self.reconnect_delay));
        }
        step
    }

    fn on_reconnect_due(&mut self) -> Step {
        self.timer_armed = false;
        if self.state != ConnectionState::Disconnected {
            return Step::default();
        }
        self.state = ConnectionState::Connecting;
        Step::default()
            .notice(Notice::Status(ConnectionState::Connecting))
            .command(Command::Open)
    }

    fn on_teardown(&mut self) -> Step {
        self.mounted = false;
        self.open = false;
        let mut step = Step::default();
        if self.timer_armed {
            self.timer_armed = false;
            step = step.command(Command::CancelReconnect);
        }
        step.command(Command::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        let mut m = Machine::new(ClientRole::Admin, Some("tok".into()), RECONNECT_DELAY);
        m.start();
        m
    }

    fn connected() -> Machine {
        let mut m = machine();
        m.handle(Input::Opened);
        m
    }

    #[test]
    fn starts_connecting_and_opens() {
        let mut m = Machine::new(ClientRole::ButtonUi, None, RECONNECT_DELAY);
        assert_eq!(m.state(), ConnectionState::Connecting);
        let step = m.start();
        assert_eq!(step.commands, vec![Command::Open]);
    }

    #[test]
    fn open_sends_join_room_with_token() {
        let mut m = machine();
        let step = m.handle(Input::Opened);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(
            step.commands,
            vec![Command::Send(
                r#"{"event":"join_room","data":{"role":"admin","token":"tok"}}"#.into()
            )]
        );
        assert_eq!(step.notices, vec![Notice::Status(ConnectionState::Connected)]);
    }

    #[test]
    fn close_arms_exactly_one_reconnect() {
        let mut m = connected();
        let step = m.handle(Input::Closed);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(step.commands.contains(&Command::ArmReconnect(RECONNECT_DELAY)));

        // A second close report (error then close) must not stack timers.
        let again = m.handle(Input::Closed);
        assert_eq!(again, Step::default());

        let step = m.handle(Input::ReconnectDue);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(step.commands, vec![Command::Open]);
    }

    #[test]
    fn failed_open_counts_as_close() {
        let mut m = machine();
        let step = m.handle(Input::Closed);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(step.commands.contains(&Command::ArmReconnect(RECONNECT_DELAY)));
    }

    #[test]
    fn listener_status_resets_on_close() {
        let mut m = connected();
        let step = m.handle(Input::Frame(
            r#"{"event":"listener_status","data":{"connected":true}}"#.into(),
        ));
        assert_eq!(step.notices, vec![Notice::ListenerStatus(true)]);

        let step = m.handle(Input::Closed);
        assert!(step.notices.contains(&Notice::ListenerStatus(false)));
    }

    #[test]
    fn config_frames_become_notices() {
        let mut m = connected();
        let step = m.handle(Input::Frame(
            r#"{"event":"config_updated","data":{"buttons":{}}}"#.into(),
        ));
        assert!(matches!(
            step.notices.as_slice(),
            [Notice::Config(_, ConfigSource::Updated)]
        ));
        assert_eq!(m.handle(Input::Frame("{garbage".into())), Step::default());
    }

    #[test]
    fn auth_error_is_terminal() {
        let mut m = connected();
        let step = m.handle(Input::Frame(r#"{"event":"auth_error"}"#.into()));
        assert_eq!(m.state(), ConnectionState::Unauthorized);
        assert!(step.commands.contains(&Command::Close));
        assert!(step.commands.contains(&Command::PurgeCredentials));
        assert!(step.notices.contains(&Notice::Unauthorized));

        // The close that follows never schedules a retry.
        assert_eq!(m.handle(Input::Closed), Step::default());
        assert_eq!(m.handle(Input::ReconnectDue), Step::default());
        assert_eq!(m.state(), ConnectionState::Unauthorized);
    }

    #[test]
    fn sends_are_dropped_unless_open() {
        let msg = Outbound::TriggerKey {
            button_id: "b1".into(),
        };
        let mut m = machine();
        assert_eq!(m.send(&msg), None);
        m.handle(Input::Opened);
        assert!(m.send(&msg).is_some());
        m.handle(Input::Closed);
        assert_eq!(m.send(&msg), None);
    }

    #[test]
    fn teardown_cancels_timer_and_silences_everything() {
        let mut m = connected();
        m.handle(Input::Closed);
        let step = m.handle(Input::Teardown);
        assert_eq!(
            step.commands,
            vec![Command::CancelReconnect, Command::Close]
        );
        assert!(!m.is_mounted());

        assert_eq!(m.handle(Input::ReconnectDue), Step::default());
        assert_eq!(m.handle(Input::Opened), Step::default());
        assert_eq!(
            m.handle(Input::Frame(
                r#"{"event":"config_loaded","data":{"buttons":{}}}"#.into()
            )),
            Step::default()
        );
        assert_eq!(m.start(), Step::default());
    }
}
