//! Token Endpoint Port (Driven Port)
//!
//! Interface for posting OAuth grants to the platform gateway. The adapter
//! performs exactly one HTTP exchange per call and never follows redirects;
//! redirect, fallback and retry policy belong to the authenticator.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::token::{IssuedToken, TokenGrant};

/// Failure of a single token request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenRequestError {
    /// The gateway answered with a non-success status.
    #[error("token endpoint returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// `Location` header, for redirects.
        location: Option<String>,
        /// `error_description` from the response body, if any.
        description: Option<String>,
    },

    /// The request never produced a response.
    #[error("token request failed: {0}")]
    Transport(String),

    /// The success body could not be parsed.
    #[error("invalid token response: {0}")]
    Decode(String),
}

impl TokenRequestError {
    /// HTTP status, when the gateway responded.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(_) | Self::Decode(_) => None,
        }
    }
}

/// Port for the OAuth token endpoint.
#[async_trait]
pub trait TokenEndpointPort: Send + Sync {
    /// Post `grant` to `url` and return the issued token pair.
    async fn request_token(
        &self,
        url: &str,
        grant: &TokenGrant,
    ) -> Result<IssuedToken, TokenRequestError>;
}
