//! RDP REST client.
//!
//! One HTTP exchange per call. Redirects are returned to the caller as
//! statuses with their `Location`, never followed here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::{Client, Response, redirect};
use serde::Deserialize;

use crate::application::ports::{
    DiscoveryError, ServiceDiscoveryPort, TokenEndpointPort, TokenRequestError,
};
use crate::domain::token::{IssuedToken, TokenGrant, TokenState};
use crate::domain::topology::EndpointDescriptor;

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Path of the token endpoint on the auth host.
pub const TOKEN_PATH: &str = "/auth/oauth2/v1/token";

/// Path of the streaming pricing discovery endpoint.
pub const DISCOVERY_PATH: &str = "/streaming/pricing/v1/";

/// Token endpoint URL for `host:port`.
#[must_use]
pub fn token_url(host: &str, port: u16) -> String {
    format!("https://{host}:{port}{TOKEN_PATH}")
}

/// Discovery URL for `host`.
#[must_use]
pub fn discovery_url(host: &str) -> String {
    format!("https://{host}{DISCOVERY_PATH}")
}

/// Error building the HTTP client.
#[derive(Debug, thiserror::Error)]
#[error("failed to build HTTP client: {0}")]
pub struct ClientBuildError(#[from] reqwest::Error);

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    services: Vec<EndpointDescriptor>,
}

/// HTTP adapter for the token endpoint and service discovery.
#[derive(Debug, Clone)]
pub struct RdpRestClient {
    client: Client,
    discovery_url: String,
}

impl RdpRestClient {
    /// Build a client that discovers endpoints at `discovery_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(discovery_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientBuildError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            discovery_url: discovery_url.into(),
        })
    }

    /// Discovery URL this client queries.
    #[must_use]
    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }
}

#[async_trait]
impl TokenEndpointPort for RdpRestClient {
    async fn request_token(
        &self,
        url: &str,
        grant: &TokenGrant,
    ) -> Result<IssuedToken, TokenRequestError> {
        let credentials = grant.credentials();
        tracing::info!(%url, grant = %grant.kind(), "Sending authentication request");

        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .basic_auth(credentials.client_id(), Some(credentials.client_secret()))
            .form(&grant.form_fields())
            .send()
            .await
            .map_err(|e| TokenRequestError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(token_status_error(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| TokenRequestError::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| TokenRequestError::Decode(e.to_string()))
    }
}

async fn token_status_error(response: Response) -> TokenRequestError {
    let status = response.status().as_u16();
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let body = response.text().await.unwrap_or_default();
    let description = serde_json::from_str::<OAuthErrorBody>(&body)
        .ok()
        .and_then(|b| b.error_description);

    tracing::warn!(status, ?location, ?description, "Token request rejected");
    TokenRequestError::Status {
        status,
        location,
        description,
    }
}

#[async_trait]
impl ServiceDiscoveryPort for RdpRestClient {
    async fn discover(&self, token: &TokenState) -> Result<Vec<EndpointDescriptor>, DiscoveryError> {
        tracing::info!(url = %self.discovery_url, "Sending service discovery request");

        let response = self
            .client
            .get(&self.discovery_url)
            .header(ACCEPT, "application/json")
            .bearer_auth(token.access_token())
            .query(token)
            .send()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Service discovery rejected");
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;
        let parsed: DiscoveryResponse =
            serde_json::from_str(&body).map_err(|e| DiscoveryError::Decode(e.to_string()))?;

        tracing::debug!(count = parsed.services.len(), "Service discovery succeeded");
        Ok(parsed.services)
    }
}
