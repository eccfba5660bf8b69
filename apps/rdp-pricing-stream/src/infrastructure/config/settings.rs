//! Client Configuration Settings
//!
//! Configuration types for the streaming client, loaded from environment
//! variables.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::DEFAULT_AUTH_RETRY_DELAY;
use crate::domain::session::ItemSubscription;
use crate::domain::token::{Credentials, DEFAULT_APPLICATION_ID, DEFAULT_RENEWAL_MARGIN};
use crate::domain::topology::{EndpointDescriptor, TopologyMode};
use crate::infrastructure::broadcast::DEFAULT_EVENT_BUS_CAPACITY;
use crate::infrastructure::omm::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, StreamSessionConfig};
use crate::infrastructure::rdp::{DEFAULT_HTTP_TIMEOUT, discovery_url, token_url};

/// Default OAuth scope.
pub const DEFAULT_SCOPE: &str = "trapi";
/// Default gateway host.
pub const DEFAULT_AUTH_HOSTNAME: &str = "api.refinitiv.com";
/// Default gateway port.
pub const DEFAULT_AUTH_PORT: u16 = 443;
/// Default item.
pub const DEFAULT_ITEM: &str = "/EUR=";
/// Default ADS WebSocket port.
pub const DEFAULT_ADS_PORT: u16 = 15000;

/// Gateway (token endpoint and discovery) settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Gateway host.
    pub hostname: String,
    /// Gateway port for the token endpoint.
    pub port: u16,
    /// Renewal margin before token expiry.
    pub renewal_margin: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Retry delay for failed grants before the first token.
    pub retry_delay: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_AUTH_HOSTNAME.to_string(),
            port: DEFAULT_AUTH_PORT,
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            retry_delay: DEFAULT_AUTH_RETRY_DELAY,
        }
    }
}

/// Streaming session settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Login `ApplicationId`.
    pub application_id: String,
    /// Login `Position`.
    pub position: String,
    /// Items to subscribe (two or more are sent as one batch).
    pub items: Vec<String>,
    /// Service name for item requests.
    pub service: Option<String>,
    /// Single or hot standby.
    pub mode: TopologyMode,
    /// `wss` or `ws`.
    pub scheme: String,
    /// Fixed reconnect delay.
    pub reconnect_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            application_id: DEFAULT_APPLICATION_ID.to_string(),
            position: Ipv4Addr::LOCALHOST.to_string(),
            items: vec![DEFAULT_ITEM.to_string()],
            service: None,
            mode: TopologyMode::Single,
            scheme: "wss".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Shutdown grace period.
    pub shutdown_grace: Duration,
    /// Event bus capacity.
    pub event_bus_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            shutdown_grace: Duration::from_secs(1),
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Login credentials.
    pub credentials: Credentials,
    /// Gateway settings.
    pub auth: AuthSettings,
    /// ADS endpoint for direct mode (no token, no discovery).
    pub direct: Option<EndpointDescriptor>,
    /// Streaming settings.
    pub stream: StreamSettings,
    /// Process settings.
    pub server: ServerSettings,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from any variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let direct = env.get("RDP_ADS_HOST").filter(|h| !h.is_empty()).map(|host| {
            EndpointDescriptor::new(host, env.parse("RDP_ADS_PORT", DEFAULT_ADS_PORT), Vec::new())
        });

        let username = env.required("RDP_USERNAME")?;
        let (password, client_id) = if direct.is_some() {
            (
                env.get("RDP_PASSWORD").unwrap_or_default(),
                env.get("RDP_CLIENT_ID").unwrap_or_default(),
            )
        } else {
            (env.required("RDP_PASSWORD")?, env.required("RDP_CLIENT_ID")?)
        };
        let credentials = Credentials::new(
            username,
            password,
            client_id,
            env.get("RDP_CLIENT_SECRET").unwrap_or_default(),
            env.get("RDP_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
        );

        let auth_defaults = AuthSettings::default();
        let auth = AuthSettings {
            hostname: env
                .get("RDP_AUTH_HOSTNAME")
                .unwrap_or(auth_defaults.hostname),
            port: env.parse("RDP_AUTH_PORT", auth_defaults.port),
            renewal_margin: env.secs("RDP_TOKEN_RENEWAL_MARGIN_SECS", auth_defaults.renewal_margin),
            http_timeout: env.secs("RDP_HTTP_TIMEOUT_SECS", auth_defaults.http_timeout),
            retry_delay: env.secs("RDP_AUTH_RETRY_DELAY_SECS", auth_defaults.retry_delay),
        };

        let stream_defaults = StreamSettings::default();
        let items = env
            .get("RDP_ITEMS")
            .map(|v| parse_items(&v))
            .filter(|items| !items.is_empty())
            .unwrap_or(stream_defaults.items);
        let mode = if env.flag("RDP_HOTSTANDBY") {
            TopologyMode::HotStandby
        } else {
            TopologyMode::Single
        };
        let stream = StreamSettings {
            application_id: env
                .get("RDP_APP_ID")
                .unwrap_or(stream_defaults.application_id),
            position: env
                .get("RDP_POSITION")
                .unwrap_or_else(|| local_ip().to_string()),
            items,
            service: env.get("RDP_SERVICE").filter(|s| !s.is_empty()),
            mode,
            scheme: env
                .get("RDP_WEBSOCKET_SCHEME")
                .unwrap_or(stream_defaults.scheme),
            reconnect_delay: env.secs("RDP_RECONNECT_DELAY_SECS", stream_defaults.reconnect_delay),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            health_port: env.parse("RDP_HEALTH_PORT", server_defaults.health_port),
            shutdown_grace: env.millis("RDP_SHUTDOWN_GRACE_MS", server_defaults.shutdown_grace),
            event_bus_capacity: env.parse("RDP_EVENT_BUS_CAPACITY", server_defaults.event_bus_capacity),
        };

        Ok(Self {
            credentials,
            auth,
            direct,
            stream,
            server,
        })
    }

    /// Whether the client connects straight to an ADS.
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        self.direct.is_some()
    }

    /// Token endpoint URL.
    #[must_use]
    pub fn token_url(&self) -> String {
        token_url(&self.auth.hostname, self.auth.port)
    }

    /// Service discovery URL.
    #[must_use]
    pub fn discovery_url(&self) -> String {
        discovery_url(&self.auth.hostname)
    }

    /// The configured items as one subscription.
    #[must_use]
    pub fn subscription(&self) -> ItemSubscription {
        let subscription = ItemSubscription::batch(self.stream.items.iter().cloned());
        match &self.stream.service {
            Some(service) => subscription.with_service(service.clone()),
            None => subscription,
        }
    }

    /// Settings shared by every streaming session.
    #[must_use]
    pub fn session_config(&self) -> StreamSessionConfig {
        StreamSessionConfig {
            scheme: self.stream.scheme.clone(),
            reconnect: ReconnectConfig::new(self.stream.reconnect_delay),
            ..StreamSessionConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }
}

fn parse_items(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Address of the interface that routes outward; loopback if none.
///
/// Connecting a UDP socket only selects a route, no packet is sent.
#[must_use]
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
