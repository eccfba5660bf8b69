//! Message Consumer
//!
//! Logs every message a session receives, labelled by what it is.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::domain::session::{InboundMessage, LOGIN_DOMAIN, MessageKind};
use crate::infrastructure::broadcast::StreamEvent;

/// What an inbound message is, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageCategory {
    /// Login refresh (the login ack).
    LoginRefresh,
    /// Refresh for a non-login domain.
    DomainRefresh(String),
    /// Market price refresh (no domain).
    MarketPriceRefresh,
    /// Update.
    Update,
    /// Status.
    Status,
    /// Anything else.
    Other(String),
}

impl MessageCategory {
    /// Classify `message`.
    #[must_use]
    pub fn of(message: &InboundMessage) -> Self {
        match (&message.kind, message.domain.as_deref()) {
            (MessageKind::Refresh, Some(LOGIN_DOMAIN)) => Self::LoginRefresh,
            (MessageKind::Refresh, Some(domain)) => Self::DomainRefresh(domain.to_string()),
            (MessageKind::Refresh, None) => Self::MarketPriceRefresh,
            (MessageKind::Update, _) => Self::Update,
            (MessageKind::Status, _) => Self::Status,
            (kind, _) => Self::Other(kind.as_str().to_string()),
        }
    }

    /// Log label.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::LoginRefresh => "Login Refresh".to_string(),
            Self::DomainRefresh(domain) => format!("{domain} Refresh"),
            Self::MarketPriceRefresh => "Market Price Refresh".to_string(),
            Self::Update => "Update".to_string(),
            Self::Status => "Status".to_string(),
            Self::Other(kind) => kind.clone(),
        }
    }
}

/// Log session messages until cancelled or the bus closes.
pub async fn run(mut events: broadcast::Receiver<StreamEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(StreamEvent::SessionMessage { session, message }) => {
                let category = MessageCategory::of(&message);
                tracing::info!(
                    %session,
                    kind = %category.label(),
                    id = ?message.id,
                    payload = %message.payload,
                    "Received message"
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Message consumer lagged behind the event bus");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
