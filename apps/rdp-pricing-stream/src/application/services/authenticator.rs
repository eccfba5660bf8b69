//! Authenticator
//!
//! Owns the credentials and the single mutable [`TokenState`]. Acquires a
//! token with the password grant, renews it with the refresh grant
//! `margin` seconds before every expiry, and publishes the outcome of each
//! cycle on the event bus. It never talks to a session directly.
//!
//! # Failure Policy
//!
//! | Status | Action |
//! |---|---|
//! | 301, 302, 307, 308 | repeat the grant at `Location` (bounded hops) |
//! | 400, 401 | refresh grant: fall back to the password grant; password grant: fatal |
//! | 403, 451 | fatal |
//! | anything else | retry once, then give up until the next renewal |
//!
//! Only a fatal failure ends the renewal loop. Any other failed cycle is
//! retried at the next renewal time, or after `retry_delay` while no token
//! has been issued yet.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{TokenEndpointPort, TokenRequestError};
use crate::domain::token::{
    Credentials, DEFAULT_RENEWAL_MARGIN, GrantKind, TokenGrant, TokenState, renewal_delay,
};
use crate::infrastructure::broadcast::{EventBus, StreamEvent};
use crate::infrastructure::metrics::{self, GrantOutcome};

/// Redirects followed within one grant attempt before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Wait before retrying a failed grant while no token is held.
pub const DEFAULT_AUTH_RETRY_DELAY: Duration = Duration::from_secs(3);

// =============================================================================
// Error Types
// =============================================================================

/// Why a token grant cycle was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// A redirect could not be followed.
    #[error("redirect from token endpoint could not be followed: {reason}")]
    Redirect {
        /// What went wrong.
        reason: String,
    },

    /// HTTP 400 on a password grant.
    #[error("token request rejected as malformed")]
    BadRequest {
        /// Gateway error description.
        description: Option<String>,
    },

    /// HTTP 401 on a password grant.
    #[error("credentials rejected by token endpoint")]
    Unauthorized {
        /// Gateway error description.
        description: Option<String>,
    },

    /// HTTP 403.
    #[error("token request forbidden")]
    Forbidden {
        /// Gateway error description.
        description: Option<String>,
    },

    /// HTTP 451.
    #[error("token endpoint unavailable for legal reasons")]
    Unavailable {
        /// Gateway error description.
        description: Option<String>,
    },

    /// Any other failure, after one retry.
    #[error("token request failed after retry: {reason}")]
    Transient {
        /// Last failure.
        reason: String,
    },
}

impl AuthError {
    /// Whether no later grant can succeed without operator action.
    ///
    /// 400/401 only surface on a password grant, so they mean the
    /// credentials themselves are rejected.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BadRequest { .. }
                | Self::Unauthorized { .. }
                | Self::Forbidden { .. }
                | Self::Unavailable { .. }
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Authenticator settings.
#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    /// Configured token endpoint URL.
    pub token_url: String,
    /// Time before expiry at which the token is renewed.
    pub renewal_margin: Duration,
    /// Redirect hops followed per attempt.
    pub max_redirects: usize,
    /// Wait before retrying a failed grant while no token is held.
    pub retry_delay: Duration,
}

impl AuthenticatorConfig {
    /// Settings for `token_url` with default margin and hop limit.
    #[must_use]
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry_delay: DEFAULT_AUTH_RETRY_DELAY,
        }
    }
}

// =============================================================================
// Authenticator
// =============================================================================

/// Token lifecycle owner.
pub struct Authenticator<T: TokenEndpointPort> {
    endpoint: Arc<T>,
    credentials: Credentials,
    config: AuthenticatorConfig,
    state: TokenState,
    bus: EventBus,
}

impl<T: TokenEndpointPort> Authenticator<T> {
    /// Create an authenticator starting from an unauthenticated `state`.
    pub const fn new(
        endpoint: Arc<T>,
        credentials: Credentials,
        config: AuthenticatorConfig,
        state: TokenState,
        bus: EventBus,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            config,
            state,
            bus,
        }
    }

    /// Current token state.
    #[must_use]
    pub const fn token(&self) -> &TokenState {
        &self.state
    }

    /// Acquire a token with the password grant.
    ///
    /// Publishes `TokenAcquired` on success and `TokenFailed` on failure.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] the failure policy gave up with.
    pub async fn acquire_token(&mut self) -> Result<TokenState, AuthError> {
        let grant = TokenGrant::Password(self.credentials.clone());
        self.grant_cycle(grant).await
    }

    /// Renew the token with the held refresh token.
    ///
    /// Uses the password grant if no refresh token has been issued yet.
    /// Publishes `TokenRefreshed` (or `TokenAcquired` after a password
    /// fallback) on success and `TokenFailed` on failure.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] the failure policy gave up with.
    pub async fn refresh_token(&mut self) -> Result<TokenState, AuthError> {
        let grant = self.renewal_grant();
        self.grant_cycle(grant).await
    }

    /// Acquire a token, then renew it before every expiry until cancelled
    /// or a cycle fails fatally.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut result = tokio::select! {
            () = cancel.cancelled() => return,
            result = self.acquire_token() => result,
        };

        loop {
            let delay = match result {
                Ok(token) => {
                    let delay = renewal_delay(token.expires_in(), self.config.renewal_margin);
                    tracing::info!(
                        expires_in = token.expires_in(),
                        renew_in_secs = delay.as_secs(),
                        "Token renewal scheduled"
                    );
                    delay
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!(%error, "Token lifecycle stopped");
                    return;
                }
                Err(error) => {
                    let delay = self.retry_delay();
                    tracing::warn!(%error, retry_in_secs = delay.as_secs(), "Token grant will be retried");
                    delay
                }
            };

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            tracing::info!(url = %self.config.token_url, "Renewing access token");
            result = tokio::select! {
                () = cancel.cancelled() => return,
                result = self.refresh_token() => result,
            };
        }
    }

    /// Next attempt after a non-fatal failure: the regular renewal time of
    /// the held token, or the fixed retry delay before the first token.
    fn retry_delay(&self) -> Duration {
        if self.state.is_authenticated() {
            renewal_delay(self.state.expires_in(), self.config.renewal_margin)
        } else {
            self.config.retry_delay
        }
    }

    fn renewal_grant(&self) -> TokenGrant {
        match self.state.refresh_token() {
            Some(refresh_token) => TokenGrant::Refresh {
                credentials: self.credentials.clone(),
                refresh_token: refresh_token.to_string(),
            },
            None => TokenGrant::Password(self.credentials.clone()),
        }
    }

    async fn grant_cycle(&mut self, grant: TokenGrant) -> Result<TokenState, AuthError> {
        match self.execute(grant).await {
            Ok(kind) => {
                metrics::record_token_grant(kind, GrantOutcome::Success);
                let token = self.state.clone();
                let event = match kind {
                    GrantKind::Password => {
                        tracing::info!(expires_in = token.expires_in(), "Authentication succeeded");
                        StreamEvent::TokenAcquired(token.clone())
                    }
                    GrantKind::Refresh => {
                        tracing::info!(expires_in = token.expires_in(), "Token refreshed");
                        StreamEvent::TokenRefreshed(token.clone())
                    }
                };
                self.bus.publish(event);
                Ok(token)
            }
            Err((kind, error)) => {
                metrics::record_token_grant(kind, GrantOutcome::Failed);
                tracing::error!(grant = %kind, %error, "Authentication failed");
                self.bus.publish(StreamEvent::TokenFailed(error.clone()));
                Err(error)
            }
        }
    }

    /// Run one grant through the failure policy. Returns the kind of the
    /// grant that finally succeeded (or last failed).
    async fn execute(&mut self, initial: TokenGrant) -> Result<GrantKind, (GrantKind, AuthError)> {
        let mut grant = initial;
        let mut url = self.config.token_url.clone();
        let mut redirects = 0;
        let mut retried = false;
        let mut fell_back = false;

        loop {
            let kind = grant.kind();
            let error = match self.endpoint.request_token(&url, &grant).await {
                Ok(issued) => {
                    self.state.apply(issued);
                    return Ok(kind);
                }
                Err(error) => error,
            };

            match error.status() {
                Some(status @ (301 | 302 | 307 | 308)) => {
                    redirects += 1;
                    if redirects > self.config.max_redirects {
                        return Err((
                            kind,
                            AuthError::Redirect {
                                reason: format!("more than {} redirects", self.config.max_redirects),
                            },
                        ));
                    }
                    url = resolve_location(&url, &error).map_err(|e| (kind, e))?;
                    metrics::record_token_grant(kind, GrantOutcome::Redirected);
                    tracing::warn!(status, location = %url, "Token endpoint redirected");
                }
                Some(400 | 401) if kind == GrantKind::Refresh && !fell_back => {
                    fell_back = true;
                    metrics::record_token_grant(kind, GrantOutcome::Retried);
                    tracing::warn!(
                        status = error.status(),
                        "Refresh token rejected, retrying with password grant"
                    );
                    grant = TokenGrant::Password(self.credentials.clone());
                    url = self.config.token_url.clone();
                }
                Some(400) => return Err((kind, AuthError::BadRequest { description: description(error) })),
                Some(401) => return Err((kind, AuthError::Unauthorized { description: description(error) })),
                Some(403) => return Err((kind, AuthError::Forbidden { description: description(error) })),
                Some(451) => return Err((kind, AuthError::Unavailable { description: description(error) })),
                _ if retried => {
                    return Err((
                        kind,
                        AuthError::Transient {
                            reason: error.to_string(),
                        },
                    ));
                }
                _ => {
                    retried = true;
                    metrics::record_token_grant(kind, GrantOutcome::Retried);
                    tracing::warn!(%error, "Token request failed, retrying once");
                    if !fell_back {
                        grant = self.renewal_grant();
                    }
                }
            }
        }
    }
}

fn description(error: TokenRequestError) -> Option<String> {
    match error {
        TokenRequestError::Status { description, .. } => description,
        TokenRequestError::Transport(_) | TokenRequestError::Decode(_) => None,
    }
}

/// Resolve a redirect's `Location` against the URL that produced it.
fn resolve_location(current: &str, error: &TokenRequestError) -> Result<String, AuthError> {
    let TokenRequestError::Status {
        location: Some(location),
        ..
    } = error
    else {
        return Err(AuthError::Redirect {
            reason: "missing Location header".to_string(),
        });
    };

    Url::parse(current)
        .and_then(|base| base.join(location))
        .map(String::from)
        .map_err(|e| AuthError::Redirect {
            reason: format!("invalid Location {location:?}: {e}"),
        })
}
