//! Event Bus
//!
//! In-process typed publish/subscribe between the authenticator, the session
//! supervisor, the sessions and any consumer, built on a tokio broadcast
//! channel.
//!
//! Every subscriber sees every event published after it subscribed, in
//! publish order. A subscriber that falls more than the channel capacity
//! behind skips the oldest events and is told how many it missed.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::application::ports::DiscoveryError;
use crate::application::services::AuthError;
use crate::domain::session::InboundMessage;
use crate::domain::token::TokenState;
use crate::domain::topology::{EndpointDescriptor, SessionId};

/// Default channel capacity.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;

// =============================================================================
// Events
// =============================================================================

/// Everything that happens in the client, with its payload.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A password grant succeeded.
    TokenAcquired(TokenState),
    /// A refresh grant succeeded.
    TokenRefreshed(TokenState),
    /// The authenticator gave up on a grant.
    TokenFailed(AuthError),
    /// Discovery returned the endpoints sessions were bound to.
    DiscoverySucceeded {
        /// Selected endpoints, in session order.
        endpoints: Vec<EndpointDescriptor>,
    },
    /// Discovery failed; no sessions were created.
    DiscoveryFailed(DiscoveryError),
    /// A session's socket opened and its login was sent.
    SessionOpened {
        /// Session id.
        session: SessionId,
        /// Endpoint connected to.
        endpoint: EndpointDescriptor,
    },
    /// A session's login was acknowledged on a new socket.
    SessionLoggedIn {
        /// Session id.
        session: SessionId,
        /// Logins completed by the session so far.
        login_count: u32,
    },
    /// A session's login refresh was acknowledged.
    SessionLoginRefreshed {
        /// Session id.
        session: SessionId,
    },
    /// A session received a message.
    SessionMessage {
        /// Session id.
        session: SessionId,
        /// The message.
        message: InboundMessage,
    },
    /// A session lost its socket and will reconnect.
    SessionReconnecting {
        /// Session id.
        session: SessionId,
        /// Delay before the next connect.
        delay: Duration,
    },
    /// A session closed for good.
    SessionClosed {
        /// Session id.
        session: SessionId,
    },
}

impl StreamEvent {
    /// Session the event belongs to, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&SessionId> {
        match self {
            Self::SessionOpened { session, .. }
            | Self::SessionLoggedIn { session, .. }
            | Self::SessionLoginRefreshed { session }
            | Self::SessionMessage { session, .. }
            | Self::SessionReconnecting { session, .. }
            | Self::SessionClosed { session } => Some(session),
            Self::TokenAcquired(_)
            | Self::TokenRefreshed(_)
            | Self::TokenFailed(_)
            | Self::DiscoverySucceeded { .. }
            | Self::DiscoveryFailed(_) => None,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TokenAcquired(_) => "token_acquired",
            Self::TokenRefreshed(_) => "token_refreshed",
            Self::TokenFailed(_) => "token_failed",
            Self::DiscoverySucceeded { .. } => "discovery_succeeded",
            Self::DiscoveryFailed(_) => "discovery_failed",
            Self::SessionOpened { .. } => "session_opened",
            Self::SessionLoggedIn { .. } => "session_logged_in",
            Self::SessionLoginRefreshed { .. } => "session_login_refreshed",
            Self::SessionMessage { .. } => "session_message",
            Self::SessionReconnecting { .. } => "session_reconnecting",
            Self::SessionClosed { .. } => "session_closed",
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Cloneable handle to the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    /// Create a bus holding at most `capacity` unread events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Publish an event. Returns how many subscribers will see it.
    pub fn publish(&self, event: StreamEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
