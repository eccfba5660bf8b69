//! Service Discovery Port (Driven Port)
//!
//! Interface for listing the streaming endpoints available to a token.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::token::TokenState;
use crate::domain::topology::{EndpointDescriptor, InsufficientEndpoints};

/// Service discovery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// Discovery answered with a non-success status.
    #[error("service discovery returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The request never produced a response.
    #[error("service discovery request failed: {0}")]
    Transport(String),

    /// The response body could not be parsed.
    #[error("invalid service discovery response: {0}")]
    Decode(String),

    /// Too few endpoints for the configured topology.
    #[error(transparent)]
    InsufficientEndpoints(#[from] InsufficientEndpoints),
}

/// Port for streaming service discovery.
#[async_trait]
pub trait ServiceDiscoveryPort: Send + Sync {
    /// List every advertised streaming endpoint, in the order returned.
    async fn discover(&self, token: &TokenState) -> Result<Vec<EndpointDescriptor>, DiscoveryError>;
}
