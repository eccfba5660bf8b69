//! Session Supervisor
//!
//! Turns token events into streaming sessions. The first `TokenAcquired`
//! runs service discovery and spawns one session (single mode) or two
//! (hot standby); later tokens are handed to the running sessions as login
//! refreshes. Sessions are never reconnected from here; each one owns its
//! own reconnect timer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DiscoveryError, ServiceDiscoveryPort};
use crate::domain::session::{ItemSubscription, LoginMode};
use crate::domain::token::{DEFAULT_APPLICATION_ID, TokenState};
use crate::domain::topology::{EndpointDescriptor, SessionId, TopologyMode, select_endpoints};
use crate::infrastructure::broadcast::{EventBus, StreamEvent};
use crate::infrastructure::omm::{StreamSession, StreamSessionConfig, StreamSessionHandle};

/// Time sessions get to close on shutdown before they are aborted.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Single or hot standby.
    pub mode: TopologyMode,
    /// Settings handed to every session.
    pub session: StreamSessionConfig,
    /// Shutdown grace period.
    pub shutdown_grace: Duration,
    /// Subscriptions queued on every session at creation.
    pub subscriptions: Vec<ItemSubscription>,
    /// Position sent in direct-mode logins.
    pub position: String,
    /// Application id sent in direct-mode logins.
    pub application_id: String,
}

impl SupervisorConfig {
    /// Defaults for `mode`, with no subscriptions.
    #[must_use]
    pub fn new(mode: TopologyMode, position: impl Into<String>) -> Self {
        Self {
            mode,
            session: StreamSessionConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            subscriptions: Vec::new(),
            position: position.into(),
            application_id: DEFAULT_APPLICATION_ID.to_string(),
        }
    }
}

struct SupervisedSession {
    handle: StreamSessionHandle,
    task: JoinHandle<()>,
}

/// Creates, feeds and shuts down the streaming sessions.
pub struct SessionSupervisor<D: ServiceDiscoveryPort> {
    discovery: Arc<D>,
    config: SupervisorConfig,
    bus: EventBus,
    sessions: Vec<SupervisedSession>,
}

impl<D: ServiceDiscoveryPort> SessionSupervisor<D> {
    /// Create a supervisor with no sessions.
    pub const fn new(discovery: Arc<D>, config: SupervisorConfig, bus: EventBus) -> Self {
        Self {
            discovery,
            config,
            bus,
            sessions: Vec::new(),
        }
    }

    /// Topology mode.
    #[must_use]
    pub const fn mode(&self) -> TopologyMode {
        self.config.mode
    }

    /// Handles of the supervised sessions, in session order.
    pub fn sessions(&self) -> impl Iterator<Item = &StreamSessionHandle> {
        self.sessions.iter().map(|s| &s.handle)
    }

    /// React to one bus event.
    pub async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TokenAcquired(token) if self.sessions.is_empty() => {
                // Failures are published; the next TokenAcquired retries.
                let _ = self.start(token).await;
            }
            StreamEvent::TokenAcquired(token) | StreamEvent::TokenRefreshed(token) => {
                self.apply_refreshed_token(&token);
            }
            StreamEvent::TokenFailed(error) if self.sessions.is_empty() => {
                tracing::error!(%error, "No token; streaming sessions not started");
            }
            StreamEvent::TokenFailed(error) => {
                tracing::error!(%error, "Token renewal failed; sessions keep the current token");
            }
            _ => {}
        }
    }

    /// Discover endpoints with `token` and connect one session per selected
    /// endpoint.
    ///
    /// Publishes `DiscoverySucceeded` or `DiscoveryFailed`.
    ///
    /// # Errors
    ///
    /// Returns the discovery failure; no session is created.
    pub async fn start(&mut self, token: TokenState) -> Result<(), DiscoveryError> {
        let mode = self.config.mode;
        let discovered = self
            .discovery
            .discover(&token)
            .await
            .and_then(|all| select_endpoints(mode, &all).map_err(DiscoveryError::from));

        let endpoints = match discovered {
            Ok(endpoints) => endpoints,
            Err(error) => {
                tracing::error!(%error, %mode, "Service discovery failed");
                self.bus.publish(StreamEvent::DiscoveryFailed(error.clone()));
                return Err(error);
            }
        };

        tracing::info!(
            %mode,
            endpoints = ?endpoints.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Service discovery succeeded"
        );
        self.bus.publish(StreamEvent::DiscoverySucceeded {
            endpoints: endpoints.clone(),
        });

        for endpoint in endpoints {
            self.spawn_session(LoginMode::Token, endpoint, token.clone());
        }
        Ok(())
    }

    /// Connect one session straight to an ADS with a user-name login,
    /// bypassing token and discovery.
    pub fn start_direct(&mut self, endpoint: EndpointDescriptor, username: impl Into<String>) {
        let identity = TokenState::new(
            self.config.position.clone(),
            self.config.application_id.clone(),
        );
        tracing::info!(%endpoint, "Connecting directly to ADS");
        self.spawn_session(LoginMode::User(username.into()), endpoint, identity);
    }

    /// Hand a renewed token to every session.
    pub fn apply_refreshed_token(&self, token: &TokenState) {
        for session in &self.sessions {
            if let Err(error) = session.handle.apply_refreshed_token(token.clone()) {
                tracing::warn!(%error, "Token not delivered");
            }
        }
    }

    /// Queue `subscription` on every session, and on sessions created later.
    pub fn subscribe(&mut self, subscription: ItemSubscription) {
        for session in &self.sessions {
            if let Err(error) = session.handle.subscribe(subscription.clone()) {
                tracing::warn!(%error, "Subscription not delivered");
            }
        }
        self.config.subscriptions.push(subscription);
    }

    /// Disconnect every session and wait up to the grace period for them to
    /// close. Sessions still open afterwards are aborted.
    pub async fn shutdown(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        tracing::info!(sessions = self.sessions.len(), "Disconnecting sessions");

        for session in &self.sessions {
            let _ = session.handle.disconnect();
        }

        let closed = join_all(self.sessions.iter().map(|s| s.handle.closed()));
        if tokio::time::timeout(self.config.shutdown_grace, closed)
            .await
            .is_err()
        {
            tracing::warn!(
                grace_ms = self.config.shutdown_grace.as_millis(),
                "Sessions did not close within grace period"
            );
        }

        for session in self.sessions.drain(..) {
            session.task.abort();
        }
    }

    /// Process bus events until cancelled, then shut the sessions down.
    pub async fn run(mut self, mut events: broadcast::Receiver<StreamEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Supervisor lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }

        self.shutdown().await;
    }

    fn spawn_session(&mut self, login_mode: LoginMode, endpoint: EndpointDescriptor, token: TokenState) {
        let id = SessionId::nth(self.sessions.len());
        let (handle, task) = StreamSession::spawn(
            id.clone(),
            login_mode,
            self.config.session.clone(),
            self.bus.clone(),
        );

        for subscription in &self.config.subscriptions {
            let _ = handle.subscribe(subscription.clone());
        }
        if let Err(error) = handle.connect(endpoint, token) {
            tracing::error!(%error, session = %id, "Session did not start");
        }

        self.sessions.push(SupervisedSession { handle, task });
    }
}
