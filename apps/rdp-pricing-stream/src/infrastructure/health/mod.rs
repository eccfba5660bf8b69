//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (at least one session Ready)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! The server never touches a session. Its view is rebuilt from bus events
//! by [`track`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::domain::session::SessionState;
use crate::domain::topology::TopologyMode;
use crate::infrastructure::broadcast::StreamEvent;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Topology mode.
    pub mode: TopologyMode,
    /// Token status.
    pub token: TokenStatus,
    /// Per-session status, by session id.
    pub sessions: BTreeMap<String, SessionInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every expected session is Ready.
    Healthy,
    /// Some, not all, sessions are Ready.
    Degraded,
    /// No session is Ready.
    Unhealthy,
}

/// Token status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenStatus {
    /// Whether a token has been issued (always false in direct mode).
    pub authenticated: bool,
    /// Lifetime of the current token in seconds.
    pub expires_in: u64,
    /// Time of the last successful grant.
    pub last_grant: Option<DateTime<Utc>>,
    /// Last authentication or discovery failure.
    pub last_error: Option<String>,
}

/// One session's status.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Lifecycle state.
    pub state: SessionState,
    /// Endpoint of the current socket.
    pub endpoint: Option<String>,
    /// Logins completed.
    pub login_count: u32,
    /// Messages received.
    pub messages_received: u64,
    /// Reconnects scheduled.
    pub reconnects: u64,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            state: SessionState::Connecting,
            endpoint: None,
            login_count: 0,
            messages_received: 0,
            reconnects: 0,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

#[derive(Debug, Default)]
struct HealthView {
    token: TokenStatus,
    sessions: BTreeMap<String, SessionInfo>,
}

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    mode: TopologyMode,
    started_at: Instant,
    view: RwLock<HealthView>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, mode: TopologyMode) -> Self {
        Self {
            version,
            mode,
            started_at: Instant::now(),
            view: RwLock::new(HealthView::default()),
        }
    }

    /// Fold one bus event into the view.
    pub fn apply(&self, event: &StreamEvent) {
        let mut view = self.view.write();
        match event {
            StreamEvent::TokenAcquired(token) | StreamEvent::TokenRefreshed(token) => {
                view.token.authenticated = token.is_authenticated();
                view.token.expires_in = token.expires_in();
                view.token.last_grant = Some(Utc::now());
                view.token.last_error = None;
            }
            StreamEvent::TokenFailed(error) => {
                view.token.last_error = Some(error.to_string());
            }
            StreamEvent::DiscoveryFailed(error) => {
                view.token.last_error = Some(error.to_string());
            }
            StreamEvent::DiscoverySucceeded { .. } => {}
            StreamEvent::SessionOpened { session, endpoint } => {
                let info = view.sessions.entry(session.to_string()).or_default();
                info.state = SessionState::LoggingIn;
                info.endpoint = Some(endpoint.to_string());
            }
            StreamEvent::SessionLoggedIn {
                session,
                login_count,
            } => {
                let info = view.sessions.entry(session.to_string()).or_default();
                info.state = SessionState::Ready;
                info.login_count = *login_count;
            }
            StreamEvent::SessionLoginRefreshed { .. } => {}
            StreamEvent::SessionMessage { session, .. } => {
                view.sessions
                    .entry(session.to_string())
                    .or_default()
                    .messages_received += 1;
            }
            StreamEvent::SessionReconnecting { session, .. } => {
                let info = view.sessions.entry(session.to_string()).or_default();
                info.state = SessionState::ReconnectPending;
                info.endpoint = None;
                info.reconnects += 1;
            }
            StreamEvent::SessionClosed { session } => {
                let info = view.sessions.entry(session.to_string()).or_default();
                info.state = SessionState::Closed;
                info.endpoint = None;
            }
        }
    }

    /// Current health report.
    #[must_use]
    pub fn snapshot(&self) -> HealthResponse {
        let view = self.view.read();
        let ready = view.sessions.values().filter(|s| s.state.is_ready()).count();

        HealthResponse {
            status: determine_health_status(ready, self.mode.session_count()),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            mode: self.mode,
            token: view.token.clone(),
            sessions: view.sessions.clone(),
        }
    }

    /// Whether at least one session is Ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.view.read().sessions.values().any(|s| s.state.is_ready())
    }
}

/// Keep `state` in step with the bus until cancelled.
pub async fn track(
    state: Arc<HealthServerState>,
    mut events: broadcast::Receiver<StreamEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => state.apply(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Health view lagged behind the event bus");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Routes served by the health server.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = state.snapshot();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

const fn determine_health_status(ready: usize, expected: usize) -> HealthStatus {
    if ready == 0 {
        HealthStatus::Unhealthy
    } else if ready >= expected {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::topology::{EndpointDescriptor, SessionId};

    fn opened(n: usize) -> StreamEvent {
        StreamEvent::SessionOpened {
            session: SessionId::nth(n),
            endpoint: EndpointDescriptor::new("ads", 443, Vec::new()),
        }
    }

    fn logged_in(n: usize) -> StreamEvent {
        StreamEvent::SessionLoggedIn {
            session: SessionId::nth(n),
            login_count: 1,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_by_ready_sessions() {
        assert_eq!(determine_health_status(0, 1), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(1, 1), HealthStatus::Healthy);
        assert_eq!(determine_health_status(1, 2), HealthStatus::Degraded);
        assert_eq!(determine_health_status(2, 2), HealthStatus::Healthy);
    }

    #[test]
    fn view_follows_session_lifecycle() {
        let state = HealthServerState::new("test".into(), TopologyMode::HotStandby);

        state.apply(&opened(0));
        state.apply(&opened(1));
        state.apply(&logged_in(0));
        state.apply(&logged_in(1));
        assert_eq!(state.snapshot().status, HealthStatus::Healthy);

        state.apply(&StreamEvent::SessionReconnecting {
            session: SessionId::nth(1),
            delay: Duration::from_secs(3),
        });
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.sessions["session2"].state, SessionState::ReconnectPending);
        assert_eq!(snapshot.sessions["session2"].reconnects, 1);
        assert_eq!(snapshot.sessions["session1"].endpoint.as_deref(), Some("ads:443"));
        assert!(state.is_ready());

        state.apply(&StreamEvent::SessionClosed {
            session: SessionId::nth(0),
        });
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn readyz_reflects_sessions() {
        let state = Arc::new(HealthServerState::new("test".into(), TopologyMode::Single));
        let app = HealthServer::router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.apply(&opened(0));
        state.apply(&logged_in(0));
        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn track_applies_bus_events() {
        let bus = crate::infrastructure::broadcast::EventBus::default();
        let state = Arc::new(HealthServerState::new("test".into(), TopologyMode::Single));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(track(Arc::clone(&state), bus.subscribe(), cancel.clone()));

        bus.publish(opened(0));
        bus.publish(logged_in(0));
        drop(bus);
        task.await.unwrap();

        assert!(state.is_ready());
    }
}
