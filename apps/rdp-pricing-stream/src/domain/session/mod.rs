//! Streaming Session State Machine
//!
//! A sans-IO model of one WebSocket session: the driver feeds it socket
//! events and timer expiries, and it answers with [`Effect`]s to perform.
//! Nothing here touches a socket or a clock.
//!
//! # States
//!
//! ```text
//! Disconnected ─connect─► Connecting ─open─► LoggingIn ─login ack─► Ready
//!                              ▲                  │                  │
//!                              │                close              close
//!                        reconnect timer          ▼                  ▼
//!                              └──────────── ReconnectPending ◄──────┘
//!
//! any state ─disconnect─► (close) ─► Closed
//! ```
//!
//! # Invariants
//!
//! - Every inbound `Ping` produces exactly one `Pong`, emitted before anything
//!   else in the same frame is processed.
//! - A login ack received in `LoggingIn` sends every queued item request once.
//!   A login ack that answers a token-refresh login sends none.
//! - A refreshed token is only written to the wire while `Ready`; in every
//!   other non-closed state it just replaces the stored snapshot.
//! - `Closed` is reached only through [`SessionMachine::disconnect`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::token::TokenState;
use super::topology::EndpointDescriptor;

// =============================================================================
// Constants
// =============================================================================

/// Stream id of the login request.
pub const LOGIN_STREAM_ID: i64 = 1;

/// Stream id of market-price item requests.
///
/// Every item request on a session reuses this id.
pub const ITEM_STREAM_ID: i64 = LOGIN_STREAM_ID + 1;

/// Domain name of the login stream.
pub const LOGIN_DOMAIN: &str = "Login";

// =============================================================================
// Error Types
// =============================================================================

/// Operation not permitted in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The requested transition does not exist from this state.
    #[error("cannot {operation} while session is {state}")]
    InvalidTransition {
        /// Attempted operation.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Never connected.
    #[default]
    Disconnected,
    /// Socket connect in flight.
    Connecting,
    /// Socket open, login sent, waiting for the ack.
    LoggingIn,
    /// Logged in and streaming.
    Ready,
    /// Socket dropped, waiting for the reconnect timer.
    ReconnectPending,
    /// Closed by the user; terminal.
    Closed,
}

impl SessionState {
    /// Label used in logs, metrics and the health endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::LoggingIn => "logging_in",
            Self::Ready => "ready",
            Self::ReconnectPending => "reconnect_pending",
            Self::Closed => "closed",
        }
    }

    /// Whether a socket exists (connecting or open).
    #[must_use]
    pub const fn has_socket(&self) -> bool {
        matches!(self, Self::Connecting | Self::LoggingIn | Self::Ready)
    }

    /// Whether the session is logged in.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Messages
// =============================================================================

/// How a session identifies itself at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMode {
    /// Platform login with the OAuth access token.
    Token,
    /// Direct login to a deployed server with a user name.
    User(String),
}

/// Key of a login request.
#[derive(Clone, PartialEq, Eq)]
pub enum LoginKey {
    /// `NameType: AuthnToken` with the access token.
    Token(String),
    /// `Name: <user>`.
    User(String),
}

impl fmt::Debug for LoginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token([REDACTED])"),
            Self::User(name) => f.debug_tuple("User").field(name).finish(),
        }
    }
}

/// Login request contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Who is logging in.
    pub key: LoginKey,
    /// `ApplicationId` element.
    pub application_id: String,
    /// `Position` element.
    pub position: String,
    /// Login refresh (`"Refresh": false`) rather than a fresh login.
    pub refresh: bool,
}

/// A market-price subscription queued on a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemSubscription {
    /// One name, or several for a batch request.
    pub names: Vec<String>,
    /// Optional service name.
    pub service: Option<String>,
}

impl ItemSubscription {
    /// Subscription for a single item.
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            service: None,
        }
    }

    /// Subscription for several items in one batch request.
    #[must_use]
    pub fn batch<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            service: None,
        }
    }

    /// Request the items from a specific service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

/// An item request on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRequest {
    /// Stream id.
    pub id: i64,
    /// Items requested.
    pub subscription: ItemSubscription,
}

/// Messages a session writes to its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Login or login refresh.
    Login(LoginRequest),
    /// Market-price item request.
    Item(ItemRequest),
    /// Keep-alive reply.
    Pong,
}

/// Message type of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full image (login ack or item image).
    Refresh,
    /// Incremental item update.
    Update,
    /// Stream status change.
    Status,
    /// Server keep-alive.
    Ping,
    /// Server-reported request error.
    Error,
    /// Anything else.
    Other(String),
}

impl MessageKind {
    /// Classify a `Type` field.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "Refresh" => Self::Refresh,
            "Update" => Self::Update,
            "Status" => Self::Status,
            "Ping" => Self::Ping,
            "Error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Refresh => "refresh",
            Self::Update => "update",
            Self::Status => "status",
            Self::Ping => "ping",
            Self::Error => "error",
            Self::Other(other) => other,
        }
    }
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// `Type` field.
    pub kind: MessageKind,
    /// `ID` field, when present.
    pub id: Option<i64>,
    /// `Domain` field, when present (absent means market price).
    pub domain: Option<String>,
    /// The full message.
    pub payload: serde_json::Value,
}

impl InboundMessage {
    /// Whether this acknowledges a login.
    #[must_use]
    pub fn is_login_ack(&self) -> bool {
        self.kind == MessageKind::Refresh && self.domain.as_deref() == Some(LOGIN_DOMAIN)
    }
}

// =============================================================================
// Effects
// =============================================================================

/// Lifecycle notices a session reports to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Socket opened and login sent.
    Opened {
        /// Endpoint connected to.
        endpoint: EndpointDescriptor,
    },
    /// Login acknowledged on a newly opened socket.
    LoggedIn {
        /// Number of logins completed by this session, including this one.
        login_count: u32,
    },
    /// Login refresh acknowledged.
    LoginRefreshed,
    /// A non-keep-alive message arrived.
    Message(InboundMessage),
    /// Socket dropped; reconnect scheduled.
    Reconnecting,
    /// Session closed for good.
    Closed,
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a socket to the endpoint.
    Connect(EndpointDescriptor),
    /// Write a message.
    Send(Outbound),
    /// Close the socket (or abandon the in-flight connect).
    Close,
    /// Arm the reconnect timer.
    ScheduleReconnect,
    /// Drop the reconnect timer.
    CancelReconnect,
    /// Report a lifecycle notice.
    Notify(Notice),
}

// =============================================================================
// Session Machine
// =============================================================================

/// State of one streaming session.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    login_mode: LoginMode,
    endpoint: Option<EndpointDescriptor>,
    token: Option<TokenState>,
    subscriptions: Vec<ItemSubscription>,
    user_disconnect: bool,
    login_count: u32,
}

impl SessionMachine {
    /// A disconnected session that logs in with `login_mode`.
    #[must_use]
    pub const fn new(login_mode: LoginMode) -> Self {
        Self {
            state: SessionState::Disconnected,
            login_mode,
            endpoint: None,
            token: None,
            subscriptions: Vec::new(),
            user_disconnect: false,
            login_count: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Endpoint used for the last connect.
    #[must_use]
    pub const fn endpoint(&self) -> Option<&EndpointDescriptor> {
        self.endpoint.as_ref()
    }

    /// Latest token snapshot.
    #[must_use]
    pub const fn token(&self) -> Option<&TokenState> {
        self.token.as_ref()
    }

    /// Subscriptions re-sent after each login on a new socket.
    #[must_use]
    pub fn subscriptions(&self) -> &[ItemSubscription] {
        &self.subscriptions
    }

    /// Logins completed so far.
    #[must_use]
    pub const fn login_count(&self) -> u32 {
        self.login_count
    }

    /// Whether the user asked to close the session.
    #[must_use]
    pub const fn is_user_disconnect(&self) -> bool {
        self.user_disconnect
    }

    /// Start connecting to `endpoint` with `token`.
    ///
    /// # Errors
    ///
    /// Only a disconnected (or reconnect-pending) session can be connected.
    pub fn connect(
        &mut self,
        endpoint: EndpointDescriptor,
        token: TokenState,
    ) -> Result<Vec<Effect>, SessionError> {
        let mut effects = Vec::new();
        match self.state {
            SessionState::Disconnected => {}
            SessionState::ReconnectPending => effects.push(Effect::CancelReconnect),
            state => {
                return Err(SessionError::InvalidTransition {
                    operation: "connect",
                    state,
                });
            }
        }

        self.endpoint = Some(endpoint.clone());
        self.token = Some(token);
        self.state = SessionState::Connecting;
        effects.push(Effect::Connect(endpoint));
        Ok(effects)
    }

    /// The socket opened: send the login.
    pub fn on_open(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Connecting {
            return Vec::new();
        }
        self.state = SessionState::LoggingIn;

        let mut effects = vec![Effect::Send(self.login(false))];
        if let Some(endpoint) = &self.endpoint {
            effects.push(Effect::Notify(Notice::Opened {
                endpoint: endpoint.clone(),
            }));
        }
        effects
    }

    /// Process every message of one inbound frame, in order.
    pub fn on_messages(&mut self, messages: Vec<InboundMessage>) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }

        let pings = messages
            .iter()
            .filter(|m| m.kind == MessageKind::Ping)
            .count();
        let mut effects: Vec<Effect> = std::iter::repeat_n(Effect::Send(Outbound::Pong), pings)
            .collect();

        for message in messages {
            if message.kind == MessageKind::Ping {
                continue;
            }
            if message.is_login_ack() {
                self.on_login_ack(&mut effects);
            }
            effects.push(Effect::Notify(Notice::Message(message)));
        }
        effects
    }

    fn on_login_ack(&mut self, effects: &mut Vec<Effect>) {
        match self.state {
            SessionState::LoggingIn => {
                self.state = SessionState::Ready;
                self.login_count += 1;
                effects.extend(
                    self.subscriptions
                        .iter()
                        .map(|s| Effect::Send(Self::item_request(s.clone()))),
                );
                effects.push(Effect::Notify(Notice::LoggedIn {
                    login_count: self.login_count,
                }));
            }
            SessionState::Ready => effects.push(Effect::Notify(Notice::LoginRefreshed)),
            _ => {}
        }
    }

    /// The socket closed (or the connect failed).
    pub fn on_close(&mut self) -> Vec<Effect> {
        match self.state {
            SessionState::Closed => Vec::new(),
            _ if self.user_disconnect => {
                self.state = SessionState::Closed;
                vec![Effect::Notify(Notice::Closed)]
            }
            state if state.has_socket() => {
                self.state = SessionState::ReconnectPending;
                vec![
                    Effect::ScheduleReconnect,
                    Effect::Notify(Notice::Reconnecting),
                ]
            }
            _ => Vec::new(),
        }
    }

    /// The reconnect timer fired: reconnect to the last endpoint with the latest token.
    pub fn on_reconnect_timer(&mut self) -> Vec<Effect> {
        if self.state != SessionState::ReconnectPending {
            return Vec::new();
        }
        match &self.endpoint {
            Some(endpoint) => {
                self.state = SessionState::Connecting;
                vec![Effect::Connect(endpoint.clone())]
            }
            None => {
                self.state = SessionState::Disconnected;
                Vec::new()
            }
        }
    }

    /// Store a renewed token; re-login in place when `Ready`.
    pub fn apply_refreshed_token(&mut self, token: TokenState) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.token = Some(token);

        if self.state.is_ready() && self.login_mode == LoginMode::Token {
            vec![Effect::Send(self.login(true))]
        } else {
            Vec::new()
        }
    }

    /// Queue a subscription; send it now when `Ready`.
    pub fn subscribe(&mut self, subscription: ItemSubscription) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.subscriptions.push(subscription.clone());

        if self.state.is_ready() {
            vec![Effect::Send(Self::item_request(subscription))]
        } else {
            Vec::new()
        }
    }

    /// Close the session for good. Idempotent.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.user_disconnect = true;

        if self.state.has_socket() {
            return vec![Effect::Close];
        }

        let mut effects = Vec::new();
        if self.state == SessionState::ReconnectPending {
            effects.push(Effect::CancelReconnect);
        }
        self.state = SessionState::Closed;
        effects.push(Effect::Notify(Notice::Closed));
        effects
    }

    fn login(&self, refresh: bool) -> Outbound {
        let (application_id, position, access_token) = self.token.as_ref().map_or_else(
            Default::default,
            |t| {
                (
                    t.application_id().to_string(),
                    t.position().to_string(),
                    t.access_token().to_string(),
                )
            },
        );
        let key = match &self.login_mode {
            LoginMode::Token => LoginKey::Token(access_token),
            LoginMode::User(name) => LoginKey::User(name.clone()),
        };

        Outbound::Login(LoginRequest {
            key,
            application_id,
            position,
            refresh,
        })
    }

    fn item_request(subscription: ItemSubscription) -> Outbound {
        Outbound::Item(ItemRequest {
            id: ITEM_STREAM_ID,
            subscription,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token::IssuedToken;
    use serde_json::json;

    fn endpoint() -> EndpointDescriptor {
        EndpointDescriptor::new("stream.example", 443, vec!["a".into(), "b".into()])
    }

    fn token(access: &str) -> TokenState {
        let mut state = TokenState::new("10.1.2.3", "256");
        state.apply(IssuedToken {
            access_token: access.into(),
            refresh_token: "refresh".into(),
            expires_in: 600,
        });
        state
    }

    fn message(kind: &str, domain: Option<&str>) -> InboundMessage {
        InboundMessage {
            kind: MessageKind::parse(kind),
            id: Some(1),
            domain: domain.map(String::from),
            payload: json!({ "Type": kind }),
        }
    }

    fn login_ack() -> InboundMessage {
        message("Refresh", Some("Login"))
    }

    fn ping() -> InboundMessage {
        message("Ping", None)
    }

    fn sends(effects: &[Effect]) -> Vec<&Outbound> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(out) => Some(out),
                _ => None,
            })
            .collect()
    }

    fn logins(effects: &[Effect]) -> Vec<&LoginRequest> {
        sends(effects)
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Login(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    fn items(effects: &[Effect]) -> Vec<&ItemRequest> {
        sends(effects)
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Item(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    fn ready_session() -> SessionMachine {
        let mut session = SessionMachine::new(LoginMode::Token);
        session.subscribe(ItemSubscription::single("/EUR="));
        session.connect(endpoint(), token("a1")).unwrap();
        session.on_open();
        session.on_messages(vec![login_ack()]);
        assert_eq!(session.state(), SessionState::Ready);
        session
    }

    #[test]
    fn connect_moves_to_connecting_and_requests_socket() {
        let mut session = SessionMachine::new(LoginMode::Token);
        let effects = session.connect(endpoint(), token("a1")).unwrap();

        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(effects, vec![Effect::Connect(endpoint())]);
        assert_eq!(session.endpoint(), Some(&endpoint()));
    }

    #[test]
    fn connect_twice_is_rejected() {
        let mut session = SessionMachine::new(LoginMode::Token);
        session.connect(endpoint(), token("a1")).unwrap();
        let err = session.connect(endpoint(), token("a1")).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                operation: "connect",
                state: SessionState::Connecting
            }
        );
    }

    #[test]
    fn open_sends_token_login() {
        let mut session = SessionMachine::new(LoginMode::Token);
        session.connect(endpoint(), token("a1")).unwrap();
        let effects = session.on_open();

        assert_eq!(session.state(), SessionState::LoggingIn);
        let login = logins(&effects);
        assert_eq!(login.len(), 1);
        assert_eq!(login[0].key, LoginKey::Token("a1".into()));
        assert_eq!(login[0].application_id, "256");
        assert_eq!(login[0].position, "10.1.2.3");
        assert!(!login[0].refresh);
    }

    #[test]
    fn open_in_user_mode_sends_user_login() {
        let mut session = SessionMachine::new(LoginMode::User("rmds".into()));
        session
            .connect(endpoint(), TokenState::new("10.1.2.3", "256"))
            .unwrap();
        let effects = session.on_open();
        assert_eq!(logins(&effects)[0].key, LoginKey::User("rmds".into()));
    }

    #[test]
    fn first_login_ack_sends_each_queued_item_once() {
        let mut session = SessionMachine::new(LoginMode::Token);
        session.subscribe(ItemSubscription::single("/EUR="));
        session.subscribe(ItemSubscription::batch(["JPY=", "GBP="]).with_service("ELEKTRON_DD"));
        session.connect(endpoint(), token("a1")).unwrap();
        session.on_open();

        let effects = session.on_messages(vec![login_ack()]);
        let sent = items(&effects);

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|r| r.id == ITEM_STREAM_ID));
        assert_eq!(sent[0].subscription.names, ["/EUR="]);
        assert_eq!(sent[1].subscription.service.as_deref(), Some("ELEKTRON_DD"));
        assert!(effects.contains(&Effect::Notify(Notice::LoggedIn { login_count: 1 })));
    }

    #[test]
    fn refreshed_token_while_ready_sends_one_login_refresh_and_no_items() {
        let mut session = ready_session();
        let effects = session.apply_refreshed_token(token("a2"));

        assert_eq!(sends(&effects).len(), 1);
        let login = logins(&effects);
        assert_eq!(login[0].key, LoginKey::Token("a2".into()));
        assert!(login[0].refresh);
        assert!(items(&effects).is_empty());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn login_ack_after_refresh_sends_no_items() {
        let mut session = ready_session();
        session.apply_refreshed_token(token("a2"));
        let effects = session.on_messages(vec![login_ack()]);

        assert!(items(&effects).is_empty());
        assert!(effects.contains(&Effect::Notify(Notice::LoginRefreshed)));
        assert_eq!(session.login_count(), 1);
    }

    #[test]
    fn refreshed_token_while_not_ready_only_updates_snapshot() {
        let mut session = SessionMachine::new(LoginMode::Token);
        session.connect(endpoint(), token("a1")).unwrap();
        session.on_open();

        let effects = session.apply_refreshed_token(token("a2"));

        assert!(effects.is_empty());
        assert_eq!(session.token().unwrap().access_token(), "a2");
        assert_eq!(session.state(), SessionState::LoggingIn);
    }

    #[test]
    fn ping_answers_pong_before_other_messages() {
        let mut session = ready_session();
        let update = message("Update", None);
        let effects = session.on_messages(vec![update.clone(), ping()]);

        assert_eq!(effects[0], Effect::Send(Outbound::Pong));
        assert_eq!(
            effects.iter().filter(|e| **e == Effect::Send(Outbound::Pong)).count(),
            1
        );
        assert_eq!(effects[1], Effect::Notify(Notice::Message(update)));
    }

    #[test]
    fn ping_before_login_ack_is_answered_first() {
        let mut session = SessionMachine::new(LoginMode::Token);
        session.subscribe(ItemSubscription::single("/EUR="));
        session.connect(endpoint(), token("a1")).unwrap();
        session.on_open();

        let effects = session.on_messages(vec![login_ack(), ping()]);
        assert_eq!(effects[0], Effect::Send(Outbound::Pong));
        assert_eq!(items(&effects).len(), 1);
    }

    #[test]
    fn close_without_disconnect_schedules_reconnect() {
        let mut session = ready_session();
        let effects = session.on_close();

        assert_eq!(session.state(), SessionState::ReconnectPending);
        assert_eq!(
            effects,
            vec![
                Effect::ScheduleReconnect,
                Effect::Notify(Notice::Reconnecting)
            ]
        );
    }

    #[test]
    fn reconnect_uses_last_endpoint_and_latest_token() {
        let mut session = ready_session();
        session.on_close();
        session.apply_refreshed_token(token("a3"));

        let effects = session.on_reconnect_timer();
        assert_eq!(effects, vec![Effect::Connect(endpoint())]);
        assert_eq!(session.state(), SessionState::Connecting);

        let login = session.on_open();
        assert_eq!(logins(&login)[0].key, LoginKey::Token("a3".into()));
    }

    #[test]
    fn login_after_reconnect_resubscribes_on_new_socket() {
        let mut session = ready_session();
        session.on_close();
        session.on_reconnect_timer();
        session.on_open();

        let effects = session.on_messages(vec![login_ack()]);
        assert_eq!(items(&effects).len(), 1);
        assert_eq!(session.login_count(), 2);
    }

    #[test]
    fn failed_connect_schedules_reconnect() {
        let mut session = SessionMachine::new(LoginMode::Token);
        session.connect(endpoint(), token("a1")).unwrap();
        session.on_close();
        assert_eq!(session.state(), SessionState::ReconnectPending);
    }

    #[test]
    fn disconnect_with_open_socket_closes_then_settles_closed() {
        let mut session = ready_session();
        assert_eq!(session.disconnect(), vec![Effect::Close]);
        assert!(session.is_user_disconnect());

        let effects = session.on_close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(effects, vec![Effect::Notify(Notice::Closed)]);
    }

    #[test]
    fn disconnect_while_reconnect_pending_cancels_timer() {
        let mut session = ready_session();
        session.on_close();

        let effects = session.disconnect();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(effects[0], Effect::CancelReconnect);
        assert!(session.on_reconnect_timer().is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut session = SessionMachine::new(LoginMode::Token);
        assert_eq!(session.disconnect(), vec![Effect::Notify(Notice::Closed)]);
        assert!(session.disconnect().is_empty());
        assert!(session.apply_refreshed_token(token("a2")).is_empty());
        assert!(session.subscribe(ItemSubscription::single("X")).is_empty());
        assert!(session.connect(endpoint(), token("a1")).is_err());
    }

    #[test]
    fn subscribe_while_ready_sends_immediately() {
        let mut session = ready_session();
        let effects = session.subscribe(ItemSubscription::single("JPY="));
        assert_eq!(items(&effects).len(), 1);
        assert_eq!(session.subscriptions().len(), 2);
    }

    #[test]
    fn frames_are_ignored_once_closed() {
        let mut session = ready_session();
        session.disconnect();
        session.on_close();
        assert!(session.on_messages(vec![ping()]).is_empty());
    }
}
