use crate::connection::{Connector, Transport};
use crate::error::{PanelError, ProbeFailure, Result};
use crate::protocol::{ClientRole, Inbound, Outbound};
use crate::session::{build_ws_url, SessionStore};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a probe waits for the hub to answer.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// A hub address and admin token entered during onboarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: String,
    pub token: String,
}

impl Candidate {
    /// Validate raw form input. Nothing touches the network here.
    ///
    /// # Errors
    /// Returns `ProbeFailure::MissingAddress` if the address or port is blank.
    pub fn new(ip: &str, port: &str, token: &str) -> std::result::Result<Self, ProbeFailure> {
        let (ip, port) = (ip.trim(), port.trim());
        if ip.is_empty() || port.is_empty() {
            return Err(ProbeFailure::MissingAddress);
        }
        Ok(Self {
            host: format!("{ip}:{port}"),
            token: token.trim().to_string(),
        })
    }
}

/// Validate a candidate against the hub with a throwaway connection and, on
/// success, persist it.
///
/// Joins as `admin`; `room_joined` with role `admin` is success, `auth_error`
/// means a bad token. Silence for `timeout` means the hub is unreachable, and
/// a link that fails or closes first means the connection was refused.
/// Nothing is saved unless the probe succeeds.
///
/// # Errors
/// Returns `PanelError::Probe` with the failure reason, or a store error if
/// the validated credentials cannot be saved.
pub async fn probe(
    connector: &dyn Connector,
    session: &SessionStore,
    candidate: &Candidate,
    timeout: Duration,
) -> Result<()> {
    info!("probing hub at {}", candidate.host);

    let transport = match tokio::time::timeout(timeout, exchange(connector, candidate)).await {
        Ok(Ok(transport)) => transport,
        Ok(Err(failure)) => {
            warn!("probe of {} failed: {failure}", candidate.host);
            return Err(PanelError::Probe(failure));
        }
        Err(_) => {
            let failure = ProbeFailure::Unreachable {
                host: candidate.host.clone(),
            };
            warn!("probe of {} timed out", candidate.host);
            return Err(PanelError::Probe(failure));
        }
    };

    drop(transport);
    session.save(&candidate.host, &candidate.token)?;
    info!("hub at {} accepted the admin token", candidate.host);
    Ok(())
}

async fn exchange(
    connector: &dyn Connector,
    candidate: &Candidate,
) -> std::result::Result<Transport, ProbeFailure> {
    let refused = || ProbeFailure::Refused {
        host: candidate.host.clone(),
    };

    let mut transport = connector
        .connect(&build_ws_url(&candidate.host))
        .await
        .map_err(|e| {
            debug!("probe connect failed: {e}");
            refused()
        })?;

    let join = Outbound::JoinRoom {
        role: ClientRole::Admin,
        token: Some(candidate.token.clone()),
    };
    let text = join.encode().map_err(|e| {
        debug!("probe join encode failed: {e}");
        refused()
    })?;
    if !transport.send(text) {
        return Err(refused());
    }

    while let Some(text) = transport.recv().await {
        match Inbound::parse(&text) {
            Some(Inbound::RoomJoined { role }) if role == ClientRole::Admin.as_str() => {
                return Ok(transport);
            }
            Some(Inbound::AuthError { .. }) => return Err(ProbeFailure::InvalidToken),
            _ => {}
        }
    }

    Err(refused())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::testing::{FakeConnector, Plan};
    use crate::store::{keys, KvStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn setup(plans: Vec<Plan>) -> (
        Arc<FakeConnector>,
        tokio::sync::mpsc::UnboundedReceiver<crate::connection::transport::testing::FakeHub>,
        Arc<MemoryStore>,
        Arc<SessionStore>,
    ) {
        let (connector, hubs) = FakeConnector::new();
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(SessionStore::new(store.clone()));
        (Arc::new(connector.plan(plans)), hubs, store, session)
    }

    fn spawn_probe(
        connector: Arc<FakeConnector>,
        session: Arc<SessionStore>,
    ) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let candidate = Candidate::new("10.0.0.5", "3000", " s3cret ").unwrap();
            probe(connector.as_ref(), &session, &candidate, PROBE_TIMEOUT).await
        })
    }

    fn failure(result: Result<()>) -> ProbeFailure {
        match result {
            Err(PanelError::Probe(f)) => f,
            other => panic!("expected probe failure, got {other:?}"),
        }
    }

    #[test]
    fn blank_address_is_rejected_locally() {
        assert_eq!(
            Candidate::new("  ", "3000", "t"),
            Err(ProbeFailure::MissingAddress)
        );
        assert_eq!(
            Candidate::new("10.0.0.5", "", "t"),
            Err(ProbeFailure::MissingAddress)
        );
        assert_eq!(
            Candidate::new(" 10.0.0.5 ", " 3000 ", "t").unwrap().host,
            "10.0.0.5:3000"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn admin_room_joined_persists_credentials() {
        let (connector, mut hubs, store, session) = setup(vec![]);
        let task = spawn_probe(connector, session);

        let mut hub = hubs.recv().await.unwrap();
        assert_eq!(hub.url, "ws://10.0.0.5:3000");
        assert_eq!(
            hub.next_frame().await.unwrap(),
            json!({"event": "join_room", "data": {"role": "admin", "token": "s3cret"}})
        );
        hub.push(r#"{"event":"room_joined","data":{"role":"admin"}}"#);

        task.await.unwrap().unwrap();
        assert_eq!(store.get(keys::HUB_HOST).as_deref(), Some("10.0.0.5:3000"));
        assert_eq!(store.get(keys::TOKEN).as_deref(), Some("s3cret"));
        assert!(hub.panel_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_token_reports_invalid_token_and_saves_nothing() {
        let (connector, mut hubs, store, session) = setup(vec![]);
        let task = spawn_probe(connector, session);

        let mut hub = hubs.recv().await.unwrap();
        hub.next_frame().await.unwrap();
        hub.push(r#"{"event":"room_joined","data":{"role":"button_ui"}}"#);
        hub.push(r#"{"event":"auth_error"}"#);

        assert_eq!(failure(task.await.unwrap()), ProbeFailure::InvalidToken);
        assert_eq!(store.get(keys::HUB_HOST), None);
        assert_eq!(store.get(keys::TOKEN), None);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_unreachable() {
        let (connector, mut hubs, store, session) = setup(vec![Plan::Hang]);
        let task = spawn_probe(connector, session);

        assert_eq!(
            failure(task.await.unwrap()),
            ProbeFailure::Unreachable {
                host: "10.0.0.5:3000".into()
            }
        );
        assert!(hubs.try_recv().is_err());
        assert_eq!(store.get(keys::HUB_HOST), None);
    }

    #[tokio::test(start_paused = true)]
    async fn open_but_no_answer_is_unreachable() {
        let (connector, mut hubs, _store, session) = setup(vec![]);
        let started = tokio::time::Instant::now();
        let task = spawn_probe(connector, session);
        let _hub = hubs.recv().await.unwrap();

        assert!(matches!(
            failure(task.await.unwrap()),
            ProbeFailure::Unreachable { .. }
        ));
        assert!(tokio::time::Instant::now() - started >= PROBE_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_or_dropped_link_is_refused() {
        let (connector, _hubs, _store, session) = setup(vec![Plan::Refuse]);
        let task = spawn_probe(connector, session);
        assert!(matches!(
            failure(task.await.unwrap()),
            ProbeFailure::Refused { .. }
        ));

        let (connector, mut hubs, store, session) = setup(vec![]);
        let task = spawn_probe(connector, session);
        let mut hub = hubs.recv().await.unwrap();
        hub.next_frame().await.unwrap();
        hub.hang_up();
        assert!(matches!(
            failure(task.await.unwrap()),
            ProbeFailure::Refused { .. }
        ));
        assert_eq!(store.get(keys::TOKEN), None);
    }
}
