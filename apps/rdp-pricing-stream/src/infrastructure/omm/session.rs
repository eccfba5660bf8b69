//! Streaming Session Driver
//!
//! Runs one [`SessionMachine`] against a real WebSocket. Each session is a
//! task that owns its machine, socket and reconnect timer outright; other
//! tasks reach it only through a [`StreamSessionHandle`].
//!
//! # Task Loop
//!
//! The task waits on whichever of these is live:
//!
//! - a command from a handle (connect, token, subscribe, disconnect)
//! - the in-flight connect
//! - the next frame of the open socket
//! - the reconnect timer
//!
//! Each wake-up is fed to the machine and the resulting effects are applied
//! in order before the next wake-up is taken. The task ends once the machine
//! reaches `Closed`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::Instrument;

use super::codec::OmmCodec;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::session::{
    Effect, ItemSubscription, LoginMode, Notice, Outbound, SessionMachine, SessionState,
};
use crate::domain::token::{DEFAULT_DATA_FORMAT, TokenState};
use crate::domain::topology::{EndpointDescriptor, SessionId};
use crate::infrastructure::broadcast::{EventBus, StreamEvent};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, SocketError>> + Send>>;

/// Upper bound on sending our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

// =============================================================================
// Error Types
// =============================================================================

/// Transport-level socket failure. Always followed by a close.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// WebSocket handshake or I/O failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The subprotocol is not a valid header value.
    #[error("invalid subprotocol: {0}")]
    InvalidSubprotocol(#[from] InvalidHeaderValue),
}

/// The session task has ended and no longer accepts commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session {0} has stopped")]
pub struct SessionStopped(pub SessionId);

// =============================================================================
// Configuration
// =============================================================================

/// Socket settings shared by every session.
#[derive(Debug, Clone)]
pub struct StreamSessionConfig {
    /// `wss` or `ws`.
    pub scheme: String,
    /// WebSocket subprotocol.
    pub subprotocol: String,
    /// Reconnect delay.
    pub reconnect: ReconnectConfig,
}

impl Default for StreamSessionConfig {
    fn default() -> Self {
        Self {
            scheme: "wss".to_string(),
            subprotocol: DEFAULT_DATA_FORMAT.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug)]
enum SessionCommand {
    Connect {
        endpoint: EndpointDescriptor,
        token: TokenState,
    },
    ApplyToken(TokenState),
    Subscribe(ItemSubscription),
    Disconnect,
}

/// Cloneable command handle to a session task.
#[derive(Debug, Clone)]
pub struct StreamSessionHandle {
    id: SessionId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl StreamSessionHandle {
    /// Session id.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Latest lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Connect to `endpoint` with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStopped`] if the session task has ended.
    pub fn connect(&self, endpoint: EndpointDescriptor, token: TokenState) -> Result<(), SessionStopped> {
        self.send(SessionCommand::Connect { endpoint, token })
    }

    /// Hand the session a renewed token.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStopped`] if the session task has ended.
    pub fn apply_refreshed_token(&self, token: TokenState) -> Result<(), SessionStopped> {
        self.send(SessionCommand::ApplyToken(token))
    }

    /// Queue an item subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStopped`] if the session task has ended.
    pub fn subscribe(&self, subscription: ItemSubscription) -> Result<(), SessionStopped> {
        self.send(SessionCommand::Subscribe(subscription))
    }

    /// Close the session for good.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStopped`] if the session task has ended.
    pub fn disconnect(&self) -> Result<(), SessionStopped> {
        self.send(SessionCommand::Disconnect)
    }

    /// Wait until the session reports `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStopped`] if the task ends first.
    pub async fn wait_for(&self, target: SessionState) -> Result<(), SessionStopped> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionStopped(self.id.clone()))
    }

    /// Wait until the session is closed or its task has ended.
    pub async fn closed(&self) {
        let _ = self.wait_for(SessionState::Closed).await;
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionStopped> {
        self.commands
            .send(command)
            .map_err(|_| SessionStopped(self.id.clone()))
    }
}

// =============================================================================
// Session Task
// =============================================================================

/// Socket, in-flight connect and reconnect timer of one session.
#[derive(Default)]
struct Link {
    connecting: Option<ConnectFuture>,
    write: Option<WsWrite>,
    read: Option<WsRead>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Link {
    fn attach(&mut self, stream: WsStream) {
        let (write, read) = stream.split();
        self.connecting = None;
        self.write = Some(write);
        self.read = Some(read);
    }

    fn drop_socket(&mut self) {
        self.write = None;
        self.read = None;
    }

    async fn close(&mut self) {
        self.connecting = None;
        if let Some(mut write) = self.write.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::debug!(%error, "Close frame not sent"),
                Err(_) => tracing::debug!("Close frame timed out"),
            }
        }
        self.read = None;
    }
}

enum Wake {
    Command(Option<SessionCommand>),
    Connected(Result<WsStream, SocketError>),
    Frame(Option<Result<Message, tungstenite::Error>>),
    ReconnectTimer,
}

/// One WebSocket session task.
pub struct StreamSession {
    id: SessionId,
    config: StreamSessionConfig,
    machine: SessionMachine,
    codec: OmmCodec,
    policy: ReconnectPolicy,
    bus: EventBus,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state_tx: watch::Sender<SessionState>,
    link: Link,
}

impl StreamSession {
    /// Spawn a disconnected session task.
    #[must_use]
    pub fn spawn(
        id: SessionId,
        login_mode: LoginMode,
        config: StreamSessionConfig,
        bus: EventBus,
    ) -> (StreamSessionHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let span = tracing::info_span!("session", id = %id);

        let session = Self {
            id: id.clone(),
            policy: ReconnectPolicy::new(config.reconnect),
            config,
            machine: SessionMachine::new(login_mode),
            codec: OmmCodec::new(),
            bus,
            commands,
            state_tx,
            link: Link::default(),
        };
        let task = tokio::spawn(session.run().instrument(span));

        (
            StreamSessionHandle {
                id,
                commands: commands_tx,
                state,
            },
            task,
        )
    }

    async fn run(mut self) {
        tracing::debug!("Session task started");

        while self.machine.state() != SessionState::Closed {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                result = connect_completion(self.link.connecting.as_mut()) => Wake::Connected(result),
                frame = next_frame(self.link.read.as_mut()) => Wake::Frame(frame),
                () = timer_expiry(self.link.reconnect.as_mut()) => Wake::ReconnectTimer,
            };

            let effects = match wake {
                Wake::Command(Some(command)) => self.on_command(command),
                Wake::Command(None) => self.machine.disconnect(),
                Wake::Connected(Ok(stream)) => {
                    self.link.attach(stream);
                    self.machine.on_open()
                }
                Wake::Connected(Err(error)) => {
                    self.link.connecting = None;
                    tracing::warn!(%error, "WebSocket connect failed");
                    self.machine.on_close()
                }
                Wake::Frame(frame) => self.on_frame(frame),
                Wake::ReconnectTimer => {
                    self.link.reconnect = None;
                    self.machine.on_reconnect_timer()
                }
            };

            self.apply(effects).await;
        }

        tracing::debug!("Session task finished");
    }

    fn on_command(&mut self, command: SessionCommand) -> Vec<Effect> {
        match command {
            SessionCommand::Connect { endpoint, token } => {
                self.machine
                    .connect(endpoint, token)
                    .unwrap_or_else(|error| {
                        tracing::warn!(%error, "Connect ignored");
                        Vec::new()
                    })
            }
            SessionCommand::ApplyToken(token) => {
                tracing::debug!(state = %self.machine.state(), "Applying refreshed token");
                self.machine.apply_refreshed_token(token)
            }
            SessionCommand::Subscribe(subscription) => self.machine.subscribe(subscription),
            SessionCommand::Disconnect => {
                tracing::info!("Closing the WebSocket connection");
                self.machine.disconnect()
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) -> Vec<Effect> {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.on_text(text),
                Err(error) => {
                    tracing::warn!(%error, "Dropping non-UTF-8 binary frame");
                    metrics::record_protocol_error(&self.id);
                    Vec::new()
                }
            },
            Some(Ok(Message::Close(frame))) => {
                match frame {
                    Some(frame) => tracing::info!(
                        code = u16::from(frame.code),
                        reason = %frame.reason,
                        "WebSocket closed by server"
                    ),
                    None => tracing::info!("WebSocket closed by server"),
                }
                self.link.drop_socket();
                self.machine.on_close()
            }
            // Control frames are answered by tungstenite.
            Some(Ok(_)) => Vec::new(),
            Some(Err(error)) => {
                tracing::warn!(%error, "WebSocket error");
                self.link.drop_socket();
                self.machine.on_close()
            }
            None => {
                tracing::info!("WebSocket stream ended");
                self.link.drop_socket();
                self.machine.on_close()
            }
        }
    }

    fn on_text(&mut self, text: &str) -> Vec<Effect> {
        match self.codec.decode(text) {
            Ok(frame) => {
                for error in &frame.rejected {
                    tracing::warn!(%error, "Dropping malformed message");
                    metrics::record_protocol_error(&self.id);
                }
                for message in &frame.messages {
                    metrics::record_message_received(&self.id, &message.kind);
                }
                self.machine.on_messages(frame.messages)
            }
            Err(error) => {
                tracing::warn!(%error, "Dropping malformed frame");
                metrics::record_protocol_error(&self.id);
                Vec::new()
            }
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Connect(endpoint) => {
                    let url = endpoint.websocket_url(&self.config.scheme);
                    tracing::info!(%url, "Connecting to streaming endpoint");
                    self.link.connecting = Some(connect(url, self.config.subprotocol.clone()));
                }
                Effect::Send(message) => self.send(&message).await,
                Effect::Close => {
                    self.link.close().await;
                    queue.extend(self.machine.on_close());
                }
                Effect::ScheduleReconnect => {
                    let delay = self.policy.next_delay();
                    tracing::info!(
                        attempt = self.policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to streaming endpoint"
                    );
                    metrics::record_reconnect(&self.id);
                    self.link.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Effect::CancelReconnect => self.link.reconnect = None,
                Effect::Notify(notice) => self.notify(notice),
            }
        }

        self.publish_state();
    }

    async fn send(&mut self, message: &Outbound) {
        let Some(write) = self.link.write.as_mut() else {
            tracing::debug!(message = outbound_name(message), "No open socket, message dropped");
            return;
        };

        let text = match self.codec.encode(message) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, "Failed to encode outbound message");
                return;
            }
        };

        tracing::debug!(message = outbound_name(message), "Sending");
        if let Err(error) = write.send(Message::Text(text.into())).await {
            tracing::warn!(%error, message = outbound_name(message), "WebSocket send failed");
            return;
        }
        if matches!(message, Outbound::Pong) {
            metrics::record_pongs_sent(&self.id, 1);
        }
    }

    fn notify(&mut self, notice: Notice) {
        let session = self.id.clone();
        let event = match notice {
            Notice::Opened { endpoint } => {
                tracing::info!(%endpoint, "WebSocket connected, login sent");
                StreamEvent::SessionOpened { session, endpoint }
            }
            Notice::LoggedIn { login_count } => {
                tracing::info!(login_count, "Login accepted");
                self.policy.reset();
                metrics::record_login(&self.id, false);
                StreamEvent::SessionLoggedIn {
                    session,
                    login_count,
                }
            }
            Notice::LoginRefreshed => {
                tracing::info!("Login refresh accepted");
                metrics::record_login(&self.id, true);
                StreamEvent::SessionLoginRefreshed { session }
            }
            Notice::Message(message) => StreamEvent::SessionMessage { session, message },
            Notice::Reconnecting => StreamEvent::SessionReconnecting {
                session,
                delay: self.config.reconnect.delay,
            },
            Notice::Closed => {
                tracing::info!("Session closed");
                StreamEvent::SessionClosed { session }
            }
        };
        self.bus.publish(event);
    }

    fn publish_state(&mut self) {
        let state = self.machine.state();
        let changed = self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            tracing::debug!(%state, "Session state changed");
            metrics::set_session_state(&self.id, state);
        }
    }
}

const fn outbound_name(message: &Outbound) -> &'static str {
    match message {
        Outbound::Login(login) if login.refresh => "login_refresh",
        Outbound::Login(_) => "login",
        Outbound::Item(_) => "item_request",
        Outbound::Pong => "pong",
    }
}

fn connect(url: String, subprotocol: String) -> ConnectFuture {
    Box::pin(async move {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&subprotocol)?);
        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(stream)
    })
}

async fn connect_completion(connecting: Option<&mut ConnectFuture>) -> Result<WsStream, SocketError> {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(read: Option<&mut WsRead>) -> Option<Result<Message, tungstenite::Error>> {
    match read {
        Some(read) => read.next().await,
        None => std::future::pending().await,
    }
}

async fn timer_expiry(timer: Option<&mut Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}
