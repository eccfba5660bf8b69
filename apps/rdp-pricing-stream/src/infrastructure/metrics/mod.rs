//! Prometheus Metrics Module
//!
//! Exposes client metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Tokens**: Grants by kind and outcome
//! - **Sessions**: Lifecycle state, logins, reconnects
//! - **Messages**: Inbound messages by type, pongs, protocol errors
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::session::{MessageKind, SessionState};
use crate::domain::token::GrantKind;
use crate::domain::topology::SessionId;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "rdp_stream_token_grants_total",
        "OAuth grants by kind and outcome"
    );

    describe_gauge!(
        "rdp_stream_session_state",
        "1 for the current lifecycle state of each session, 0 otherwise"
    );
    describe_counter!(
        "rdp_stream_logins_total",
        "Login acknowledgements by session and kind"
    );
    describe_counter!(
        "rdp_stream_reconnects_total",
        "Reconnects scheduled after an unexpected close"
    );

    describe_counter!(
        "rdp_stream_messages_received_total",
        "Inbound messages by session and type"
    );
    describe_counter!("rdp_stream_pongs_sent_total", "Pong replies sent");
    describe_counter!(
        "rdp_stream_protocol_errors_total",
        "Inbound frames dropped as malformed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Token issued.
    Success,
    /// Redirect followed.
    Redirected,
    /// Retried after a failure.
    Retried,
    /// Given up.
    Failed,
}

impl GrantOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Redirected => "redirected",
            Self::Retried => "retried",
            Self::Failed => "failed",
        }
    }
}

const SESSION_STATES: [SessionState; 6] = [
    SessionState::Disconnected,
    SessionState::Connecting,
    SessionState::LoggingIn,
    SessionState::Ready,
    SessionState::ReconnectPending,
    SessionState::Closed,
];

/// Record a token grant attempt.
pub fn record_token_grant(kind: GrantKind, outcome: GrantOutcome) {
    counter!(
        "rdp_stream_token_grants_total",
        "grant" => kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Publish a session's current lifecycle state.
pub fn set_session_state(session: &SessionId, state: SessionState) {
    for candidate in SESSION_STATES {
        gauge!(
            "rdp_stream_session_state",
            "session" => session.to_string(),
            "state" => candidate.as_str()
        )
        .set(if candidate == state { 1.0 } else { 0.0 });
    }
}

/// Record a login acknowledgement.
pub fn record_login(session: &SessionId, refresh: bool) {
    counter!(
        "rdp_stream_logins_total",
        "session" => session.to_string(),
        "kind" => if refresh { "refresh" } else { "initial" }
    )
    .increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect(session: &SessionId) {
    counter!(
        "rdp_stream_reconnects_total",
        "session" => session.to_string()
    )
    .increment(1);
}

/// Record an inbound message.
pub fn record_message_received(session: &SessionId, kind: &MessageKind) {
    counter!(
        "rdp_stream_messages_received_total",
        "session" => session.to_string(),
        "message_type" => kind.as_str().to_string()
    )
    .increment(1);
}

/// Record pong replies.
pub fn record_pongs_sent(session: &SessionId, count: u64) {
    counter!(
        "rdp_stream_pongs_sent_total",
        "session" => session.to_string()
    )
    .increment(count);
}

/// Record a malformed inbound frame.
pub fn record_protocol_error(session: &SessionId) {
    counter!(
        "rdp_stream_protocol_errors_total",
        "session" => session.to_string()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
