//! OAuth Token Domain
//!
//! Credentials and token state for the platform gateway. The `TokenState` is
//! owned by the authenticator; sessions only ever receive clones of it.
//!
//! # Renewal
//!
//! A token issued with `expires_in = E` seconds is renewed `margin` seconds
//! before expiry (30 s by default). Tokens that live no longer than the margin
//! are renewed after one second rather than immediately.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Transport advertised to service discovery.
pub const DEFAULT_TRANSPORT: &str = "websocket";

/// Data format advertised to service discovery and used as the WebSocket subprotocol.
pub const DEFAULT_DATA_FORMAT: &str = "tr_json2";

/// Application id sent in login requests when none is configured.
pub const DEFAULT_APPLICATION_ID: &str = "256";

/// Default time before expiry at which the token is renewed.
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(30);

/// Shortest renewal delay ever scheduled.
pub const MIN_RENEWAL_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// Credentials
// =============================================================================

/// Password-grant credentials for the platform gateway.
///
/// Immutable after construction. `Debug` redacts the password and client secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl Credentials {
    /// Create a new credential set.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
        }
    }

    /// Machine id / user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password for the password grant.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Application key, also used as the Basic auth user.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Client secret, possibly empty.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Requested OAuth scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

// =============================================================================
// Grants
// =============================================================================

/// Which OAuth grant a token request used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantKind {
    /// `grant_type=password`.
    Password,
    /// `grant_type=refresh_token`.
    Refresh,
}

impl GrantKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Refresh => "refresh_token",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token request ready to be posted to the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    /// Full re-authentication with the user's password.
    Password(Credentials),
    /// Renewal using a previously issued refresh token.
    Refresh {
        /// Credentials (username and client id are still sent).
        credentials: Credentials,
        /// Refresh token from the last successful grant.
        refresh_token: String,
    },
}

impl TokenGrant {
    /// The grant kind.
    #[must_use]
    pub const fn kind(&self) -> GrantKind {
        match self {
            Self::Password(_) => GrantKind::Password,
            Self::Refresh { .. } => GrantKind::Refresh,
        }
    }

    /// Credentials the grant is issued for.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        match self {
            Self::Password(credentials) | Self::Refresh { credentials, .. } => credentials,
        }
    }

    /// Form fields for the token request body.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Password(c) => vec![
                ("username", c.username.clone()),
                ("password", c.password.clone()),
                ("grant_type", "password".to_string()),
                ("takeExclusiveSignOnControl", "true".to_string()),
                ("scope", c.scope.clone()),
                ("client_id", c.client_id.clone()),
                ("client_secret", c.client_secret.clone()),
            ],
            Self::Refresh {
                credentials,
                refresh_token,
            } => vec![
                ("username", credentials.username.clone()),
                ("refresh_token", refresh_token.clone()),
                ("grant_type", "refresh_token".to_string()),
                ("takeExclusiveSignOnControl", "true".to_string()),
            ],
        }
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(c) => f.debug_tuple("Password").field(c).finish(),
            Self::Refresh { credentials, .. } => f
                .debug_struct("Refresh")
                .field("credentials", credentials)
                .field("refresh_token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Token pair returned by a successful grant.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedToken {
    /// Bearer token for discovery and WebSocket login.
    pub access_token: String,
    /// Token for the next refresh grant.
    #[serde(default)]
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub expires_in: u64,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The gateway sends `expires_in` as a string; accept numbers too.
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Token State
// =============================================================================

/// Current token pair plus the session parameters discovery and login need.
///
/// Serializes to the discovery query string
/// (`access_token, refresh_token, expires_in, transport, dataformat, position, appId`).
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenState {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
    transport: String,
    #[serde(rename = "dataformat")]
    data_format: String,
    position: String,
    #[serde(rename = "appId")]
    application_id: String,
}

impl TokenState {
    /// Empty state for a client at `position` identifying as `application_id`.
    #[must_use]
    pub fn new(position: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            expires_in: 0,
            transport: DEFAULT_TRANSPORT.to_string(),
            data_format: DEFAULT_DATA_FORMAT.to_string(),
            position: position.into(),
            application_id: application_id.into(),
        }
    }

    /// Record a freshly issued token pair.
    ///
    /// A grant that omits the refresh token keeps the previous one.
    pub fn apply(&mut self, issued: IssuedToken) {
        self.access_token = issued.access_token;
        if !issued.refresh_token.is_empty() {
            self.refresh_token = issued.refresh_token;
        }
        self.expires_in = issued.expires_in;
    }

    /// Whether any grant has succeeded yet.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty() || !self.refresh_token.is_empty()
    }

    /// Refresh token, if one has been issued.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        (!self.refresh_token.is_empty()).then_some(self.refresh_token.as_str())
    }

    /// Current access token (empty before the first grant).
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Lifetime of the current access token in seconds.
    #[must_use]
    pub const fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// Transport advertised to discovery.
    #[must_use]
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Data format, also the WebSocket subprotocol.
    #[must_use]
    pub fn data_format(&self) -> &str {
        &self.data_format
    }

    /// Client position (host address) sent at login.
    #[must_use]
    pub fn position(&self) -> &str {
        &self.position
    }

    /// Application id sent at login.
    #[must_use]
    pub fn application_id(&self) -> &str {
        &self.application_id
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("transport", &self.transport)
            .field("data_format", &self.data_format)
            .field("position", &self.position)
            .field("application_id", &self.application_id)
            .finish()
    }
}

// =============================================================================
// Renewal Schedule
// =============================================================================

/// Delay before renewing a token that expires in `expires_in` seconds.
///
/// Returns `expires_in - margin`, never less than [`MIN_RENEWAL_DELAY`].
#[must_use]
pub fn renewal_delay(expires_in: u64, margin: Duration) -> Duration {
    Duration::from_secs(expires_in)
        .saturating_sub(margin)
        .max(MIN_RENEWAL_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn credentials() -> Credentials {
        Credentials::new("machine-1", "hunter2", "app-key", "shh", "trapi")
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let debug = format!("{:?}", credentials());
        assert!(debug.contains("machine-1"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("shh"));
    }

    #[test]
    fn password_grant_form_fields() {
        let fields = TokenGrant::Password(credentials()).form_fields();
        let get = |k: &str| fields.iter().find(|(n, _)| *n == k).map(|(_, v)| v.as_str());

        assert_eq!(get("grant_type"), Some("password"));
        assert_eq!(get("username"), Some("machine-1"));
        assert_eq!(get("password"), Some("hunter2"));
        assert_eq!(get("takeExclusiveSignOnControl"), Some("true"));
        assert_eq!(get("scope"), Some("trapi"));
        assert_eq!(get("client_id"), Some("app-key"));
        assert_eq!(get("client_secret"), Some("shh"));
    }

    #[test]
    fn refresh_grant_form_fields_omit_password() {
        let grant = TokenGrant::Refresh {
            credentials: credentials(),
            refresh_token: "r-1".to_string(),
        };
        let fields = grant.form_fields();

        assert_eq!(grant.kind(), GrantKind::Refresh);
        assert!(fields.contains(&("refresh_token", "r-1".to_string())));
        assert!(fields.contains(&("grant_type", "refresh_token".to_string())));
        assert!(!fields.iter().any(|(k, _)| *k == "password"));
        assert!(!format!("{grant:?}").contains("r-1"));
    }

    #[test]
    fn issued_token_accepts_string_or_number_expiry() {
        let text: IssuedToken = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":"600","scope":"trapi"}"#,
        )
        .unwrap();
        let number: IssuedToken =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":"r","expires_in":300}"#)
                .unwrap();

        assert_eq!(text.expires_in, 600);
        assert_eq!(number.expires_in, 300);
    }

    #[test]
    fn issued_token_rejects_garbage_expiry() {
        let result: Result<IssuedToken, _> =
            serde_json::from_str(r#"{"access_token":"a","expires_in":"soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn token_state_apply_keeps_previous_refresh_token() {
        let mut state = TokenState::new("10.0.0.1", DEFAULT_APPLICATION_ID);
        assert!(!state.is_authenticated());
        assert_eq!(state.refresh_token(), None);

        state.apply(IssuedToken {
            access_token: "a1".into(),
            refresh_token: "r1".into(),
            expires_in: 600,
        });
        state.apply(IssuedToken {
            access_token: "a2".into(),
            refresh_token: String::new(),
            expires_in: 300,
        });

        assert!(state.is_authenticated());
        assert_eq!(state.access_token(), "a2");
        assert_eq!(state.refresh_token(), Some("r1"));
        assert_eq!(state.expires_in(), 300);
    }

    #[test]
    fn token_state_serializes_discovery_query_names() {
        let mut state = TokenState::new("10.0.0.1", "256");
        state.apply(IssuedToken {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 600,
        });

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["dataformat"], "tr_json2");
        assert_eq!(value["appId"], "256");
        assert_eq!(value["transport"], "websocket");
        assert_eq!(value["position"], "10.0.0.1");
        assert_eq!(value["expires_in"], 600);
    }

    #[test]
    fn token_state_debug_redacts_tokens() {
        let mut state = TokenState::new("10.0.0.1", "256");
        state.apply(IssuedToken {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            expires_in: 600,
        });
        let debug = format!("{state:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn renewal_delay_short_tokens_clamp_to_minimum() {
        assert_eq!(renewal_delay(30, DEFAULT_RENEWAL_MARGIN), MIN_RENEWAL_DELAY);
        assert_eq!(renewal_delay(0, DEFAULT_RENEWAL_MARGIN), MIN_RENEWAL_DELAY);
        assert_eq!(renewal_delay(60, DEFAULT_RENEWAL_MARGIN), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn renewal_fires_exactly_margin_before_expiry(expires_in in 31u64..1_000_000) {
            let delay = renewal_delay(expires_in, DEFAULT_RENEWAL_MARGIN);
            prop_assert_eq!(delay, Duration::from_secs(expires_in - 30));
        }

        #[test]
        fn renewal_never_precedes_minimum(expires_in in 0u64..1_000_000, margin in 0u64..600) {
            let delay = renewal_delay(expires_in, Duration::from_secs(margin));
            prop_assert!(delay >= MIN_RENEWAL_DELAY);
            prop_assert!(delay <= Duration::from_secs(expires_in).max(MIN_RENEWAL_DELAY));
        }
    }
}
