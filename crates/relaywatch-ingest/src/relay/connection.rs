//! One relay connection as a long-lived task.
//!
//! Each task runs the state machine
//!
//! ```text
//! Idle ──► Connecting ──► Open ──► Closing ──┐
//!  ▲            │           │                │
//!  │            └──────► Errored ◄───────────┤
//!  └───────────── reconnect_delay ◄──────────┘
//! ```
//!
//! until it is told to stop. Transport errors never escape the task; they are
//! logged, recorded on the relay row, and followed by a reconnect after a
//! flat delay. A relay that ends the firehose subscription with `CLOSED` is
//! treated the same way.
//!
//! Closing sends a close frame and keeps reading until the relay answers, so
//! events already in flight still reach the pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use relaywatch_core::{Store, unix_now};

use super::frame::{ClientFrame, Filter, RelayFrame};
use crate::pipeline::Pipeline;

/// Subscription id of the live firehose on every connection.
pub const FIREHOSE_SUBSCRIPTION: &str = "relaywatch-live";

/// Time allowed for a polite close before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Errored,
}

/// Commands accepted by a connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a REQ. One-shot subscriptions are closed on EOSE.
    Subscribe {
        subscription: String,
        filters: Vec<Filter>,
        one_shot: bool,
    },
    /// Close a one-shot subscription if it is still open.
    Close { subscription: String },
    /// Close the socket and end the task.
    Shutdown,
}

/// Timing for a connection task.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Supervisor-side handle to a running connection task.
pub struct ConnectionHandle {
    url: String,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Queue a command without waiting. Returns false if the queue is full or
    /// the task is gone.
    pub fn try_send(&self, command: Command) -> bool {
        self.commands.try_send(command).is_ok()
    }

    pub(crate) fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Spawn the task for `url`.
pub fn spawn_connection(
    url: String,
    settings: ConnectionSettings,
    store: Arc<Store>,
    pipeline: Arc<Pipeline>,
    shutdown: watch::Receiver<bool>,
    command_buffer: usize,
) -> ConnectionHandle {
    let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

    let task = ConnectionTask {
        url: url.clone(),
        settings,
        store,
        pipeline,
        state: state_tx,
        commands: command_rx,
        shutdown,
    };

    ConnectionHandle {
        url,
        commands: command_tx,
        state: state_rx,
        task: tokio::spawn(task.run()),
    }
}

/// How a connection attempt or session ended.
enum SessionEnd {
    /// Asked to stop; do not reconnect.
    Stopped,
    /// Remote closed the socket.
    Remote,
    /// Handshake or transport failure.
    Failed(String),
}

struct ConnectionTask {
    url: String,
    settings: ConnectionSettings,
    store: Arc<Store>,
    pipeline: Arc<Pipeline>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            if self.stopping() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            counter!("relay_connect_attempts_total").increment(1);
            self.record(|store, url| store.record_connection_attempt(url))
                .await;

            let started = Instant::now();
            let attempt =
                tokio::time::timeout(self.settings.handshake_timeout, connect_async(self.url.as_str()))
                    .await;

            let end = match attempt {
                Ok(Ok((ws, _response))) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.set_state(ConnectionState::Open);
                    counter!("relay_connects_total").increment(1);
                    gauge!("relay_connections_open").increment(1.0);
                    tracing::info!(relay = %self.url, latency_ms, "Connected");
                    self.record(move |store, url| {
                        store.record_connected(url, latency_ms, unix_now())
                    })
                    .await;

                    let end = self.session(ws).await;
                    gauge!("relay_connections_open").decrement(1.0);
                    end
                }
                Ok(Err(e)) => {
                    self.set_state(ConnectionState::Errored);
                    SessionEnd::Failed(e.to_string())
                }
                Err(_) => {
                    self.set_state(ConnectionState::Errored);
                    SessionEnd::Failed("handshake timed out".to_string())
                }
            };

            counter!("relay_disconnects_total").increment(1);
            let error = match &end {
                SessionEnd::Failed(e) => {
                    tracing::debug!(relay = %self.url, "Connection failed: {}", e);
                    Some(e.clone())
                }
                SessionEnd::Remote => {
                    tracing::debug!(relay = %self.url, "Relay closed the connection");
                    None
                }
                SessionEnd::Stopped => None,
            };
            self.record(move |store, url| {
                store.record_disconnected(url, unix_now(), error.as_deref())
            })
            .await;
            self.set_state(ConnectionState::Idle);

            if matches!(end, SessionEnd::Stopped) || !self.wait_reconnect().await {
                break;
            }
        }

        self.set_state(ConnectionState::Idle);
        tracing::debug!(relay = %self.url, "Connection task stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Run a store update off the runtime; failures are logged only.
    async fn record<F>(&self, f: F)
    where
        F: FnOnce(&Store, &str) -> relaywatch_core::Result<()> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let url = self.url.clone();
        match tokio::task::spawn_blocking(move || f(&store, &url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(relay = %self.url, "Failed to record relay state: {}", e),
            Err(e) => tracing::warn!(relay = %self.url, "Relay state task failed: {}", e),
        }
    }

    /// Sleep `reconnect_delay`. Returns false if told to stop meanwhile.
    async fn wait_reconnect(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.settings.reconnect_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return false;
                    }
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return false,
                    Some(other) => {
                        tracing::debug!(relay = %self.url, ?other, "Dropping command while disconnected");
                    }
                },
            }
        }
    }

    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut one_shot: HashSet<String> = HashSet::new();

        let firehose = ClientFrame::Req {
            subscription: FIREHOSE_SUBSCRIPTION.to_string(),
            filters: vec![Filter::firehose()],
        };
        if let Err(e) = sink.send(Message::Text(firehose.to_json())).await {
            self.set_state(ConnectionState::Errored);
            return SessionEnd::Failed(e.to_string());
        }

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        self.close_session(&mut sink, &mut stream).await;
                        return SessionEnd::Stopped;
                    }
                }
                command = self.commands.recv() => {
                    let frame = match command {
                        Some(Command::Subscribe { subscription, filters, one_shot: is_one_shot }) => {
                            if is_one_shot {
                                one_shot.insert(subscription.clone());
                            }
                            ClientFrame::Req { subscription, filters }
                        }
                        Some(Command::Close { subscription }) => {
                            if !one_shot.remove(&subscription) {
                                continue;
                            }
                            ClientFrame::Close { subscription }
                        }
                        Some(Command::Shutdown) | None => {
                            self.close_session(&mut sink, &mut stream).await;
                            return SessionEnd::Stopped;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(frame.to_json())).await {
                        self.set_state(ConnectionState::Errored);
                        return SessionEnd::Failed(e.to_string());
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let Some(ended) = self.handle_text(&text) else {
                            continue;
                        };
                        if ended.subscription == FIREHOSE_SUBSCRIPTION {
                            if let Some(reason) = ended.closed_reason {
                                tracing::info!(relay = %self.url, "Relay closed the firehose: {}", reason);
                                self.close_session(&mut sink, &mut stream).await;
                                self.set_state(ConnectionState::Errored);
                                return SessionEnd::Failed(format!("firehose closed: {}", reason));
                            }
                            continue;
                        }
                        if one_shot.remove(&ended.subscription) && ended.closed_reason.is_none() {
                            let close = ClientFrame::Close { subscription: ended.subscription };
                            if let Err(e) = sink.send(Message::Text(close.to_json())).await {
                                self.set_state(ConnectionState::Errored);
                                return SessionEnd::Failed(e.to_string());
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.set_state(ConnectionState::Closing);
                        return SessionEnd::Remote;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.set_state(ConnectionState::Errored);
                        return SessionEnd::Failed(e.to_string());
                    }
                },
            }
        }
    }

    /// Send a close frame, then ingest whatever arrives until the relay
    /// closes its side or `CLOSE_TIMEOUT` passes.
    async fn close_session(
        &self,
        sink: &mut SplitSink<WsStream, Message>,
        stream: &mut SplitStream<WsStream>,
    ) {
        self.set_state(ConnectionState::Closing);
        let drain = async {
            if sink.send(Message::Close(None)).await.is_err() {
                return;
            }
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Text(text) => {
                        self.handle_text(&text);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            tracing::debug!(relay = %self.url, "Relay did not finish the close handshake");
        }
    }

    /// Dispatch one inbound text message. Returns the subscription it ended, if any.
    fn handle_text(&self, text: &str) -> Option<EndedSubscription> {
        let frame = match RelayFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                counter!("relay_frames_malformed_total").increment(1);
                tracing::debug!(relay = %self.url, "Dropping malformed frame: {}", e);
                return None;
            }
        };

        match frame {
            RelayFrame::Event { event, .. } => {
                self.pipeline.ingest(&self.url, &event);
                None
            }
            RelayFrame::Eose { subscription } => Some(EndedSubscription {
                subscription,
                closed_reason: None,
            }),
            RelayFrame::Closed {
                subscription,
                message,
            } => {
                tracing::debug!(relay = %self.url, %subscription, "Subscription closed by relay: {}", message);
                Some(EndedSubscription {
                    subscription,
                    closed_reason: Some(message),
                })
            }
            RelayFrame::Notice { message } => {
                tracing::debug!(relay = %self.url, "NOTICE: {}", message);
                None
            }
            other => {
                tracing::debug!(relay = %self.url, label = other.label(), "Ignoring frame");
                None
            }
        }
    }
}

struct EndedSubscription {
    subscription: String,
    /// Set when the relay ended it with `CLOSED`; EOSE leaves it `None`.
    closed_reason: Option<String>,
}
