use crate::error::{PanelError, Result};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// An open link to the hub, reduced to text frames in both directions.
///
/// Dropping the transport closes it: the outgoing half hangs up (the socket
/// writer sends a close frame) and the reader task is aborted.
pub struct Transport {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
    tasks: Vec<AbortHandle>,
}

impl Transport {
    pub fn new(
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            tasks: Vec::new(),
        }
    }

    /// Tie background tasks to the transport's lifetime.
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<AbortHandle>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Queue a text frame. Returns `false` once the link is gone.
    pub fn send(&self, text: String) -> bool {
        self.outgoing.send(text).is_ok()
    }

    /// Next inbound text frame, or `None` once the link has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens transports. Each call yields a brand-new link; nothing is reused.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws_stream, _response) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| PanelError::Transport(format!("connect to {url} failed: {e}")))?;
            debug!("websocket open: {url}");

            let (mut ws_write, mut ws_read) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        warn!("websocket write failed: {e}");
                        break;
                    }
                }
                let _ = ws_write.close().await;
            });

            let reader = tokio::spawn(async move {
                while let Some(frame) = ws_read.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(text.to_string()).is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("websocket read failed: {e}");
                            break;
                        }
                    }
                }
            });

            Ok(Transport::new(out_tx, in_rx).with_tasks(vec![reader.abort_handle()]))
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hub side of an in-memory transport.
    pub struct FakeHub {
        pub url: String,
        to_panel: Option<mpsc::UnboundedSender<String>>,
        from_panel: mpsc::UnboundedReceiver<String>,
    }

    impl FakeHub {
        pub fn push(&self, text: &str) {
            if let Some(tx) = &self.to_panel {
                let _ = tx.send(text.to_string());
            }
        }

        /// Close the link from the hub side.
        pub fn hang_up(&mut self) {
            self.to_panel = None;
        }

        pub async fn next_frame(&mut self) -> Option<serde_json::Value> {
            let text = self.from_panel.recv().await?;
            serde_json::from_str(&text).ok()
        }

        /// True once the panel has dropped its end of the link.
        pub fn panel_closed(&mut self) -> bool {
            matches!(
                self.from_panel.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            )
        }
    }

    /// How the next `connect` call behaves.
    pub enum Plan {
        Accept,
        Refuse,
        Hang,
    }

    /// Connector handing every accepted link to the test through a channel.
    pub struct FakeConnector {
        plans: Mutex<VecDeque<Plan>>,
        hubs: mpsc::UnboundedSender<FakeHub>,
    }

    impl FakeConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeHub>) {
            let (hubs, rx) = mpsc::unbounded_channel();
            (
                Self {
                    plans: Mutex::new(VecDeque::new()),
                    hubs,
                },
                rx,
            )
        }

        /// Queue behaviours for upcoming connects; unplanned connects accept.
        pub fn plan(self, plans: impl IntoIterator<Item = Plan>) -> Self {
            self.plans.lock().unwrap().extend(plans);
            self
        }
    }

    impl Connector for FakeConnector {
        fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport>> {
            let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Accept);
            match plan {
                Plan::Refuse => {
                    Box::pin(async { Err(PanelError::Transport("connection refused".into())) })
                }
                Plan::Hang => Box::pin(futures::future::pending()),
                Plan::Accept => {
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    let (in_tx, in_rx) = mpsc::unbounded_channel();
                    let _ = self.hubs.send(FakeHub {
                        url: url.to_string(),
                        to_panel: Some(in_tx),
                        from_panel: out_rx,
                    });
                    Box::pin(async move { Ok(Transport::new(out_tx, in_rx)) })
                }
            }
        }
    }
}
