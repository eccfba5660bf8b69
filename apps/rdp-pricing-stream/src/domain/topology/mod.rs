//! Session Topology
//!
//! Decides how many streaming sessions run and which discovered endpoints
//! they bind to.
//!
//! - **Single**: one session on the first service that spans two locations
//!   (the service itself is already redundant across zones).
//! - **Hot standby**: two sessions on the first two services that each sit in
//!   exactly one location, and not the same one.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Topology Mode
// =============================================================================

/// How many sessions to run, and against which kind of endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// One session.
    #[default]
    Single,
    /// Two independent sessions in different locations.
    HotStandby,
}

impl TopologyMode {
    /// Number of sessions this mode supervises.
    #[must_use]
    pub const fn session_count(&self) -> usize {
        match self {
            Self::Single => 1,
            Self::HotStandby => 2,
        }
    }

    /// Number of location tags a service must carry to be eligible.
    #[must_use]
    pub const fn required_locations(&self) -> usize {
        match self {
            Self::Single => 2,
            Self::HotStandby => 1,
        }
    }

    /// Label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::HotStandby => "hot_standby",
        }
    }
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Session Id
// =============================================================================

/// Identifier of a supervised session (`session1`, `session2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Id of the session at zero-based position `index`.
    #[must_use]
    pub fn nth(index: usize) -> Self {
        Self(format!("session{}", index + 1))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Endpoints
// =============================================================================

/// A streaming endpoint returned by service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Host name.
    #[serde(rename = "endpoint")]
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Availability-zone tags.
    #[serde(rename = "location", default)]
    pub locations: Vec<String>,
}

impl EndpointDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, locations: Vec<String>) -> Self {
        Self {
            host: host.into(),
            port,
            locations,
        }
    }

    /// WebSocket URL for this endpoint.
    #[must_use]
    pub fn websocket_url(&self, scheme: &str) -> String {
        format!("{scheme}://{}:{}/WebSocket", self.host, self.port)
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Not enough eligible endpoints for the requested topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{mode} topology needs {required} endpoint(s) with {locations} location(s), found {found}")]
pub struct InsufficientEndpoints {
    /// Requested mode.
    pub mode: TopologyMode,
    /// Endpoints the mode needs.
    pub required: usize,
    /// Location count an endpoint must have.
    pub locations: usize,
    /// Eligible endpoints found.
    pub found: usize,
}

/// Pick the endpoints `mode` binds sessions to, in discovery order.
///
/// A service whose location tags repeat those of an already selected one is
/// skipped, so hot standby sessions always sit on different sites.
///
/// # Errors
///
/// Returns [`InsufficientEndpoints`] if fewer eligible services were
/// discovered than the mode has sessions.
pub fn select_endpoints(
    mode: TopologyMode,
    services: &[EndpointDescriptor],
) -> Result<Vec<EndpointDescriptor>, InsufficientEndpoints> {
    let locations = mode.required_locations();
    let required = mode.session_count();

    let mut selected: Vec<EndpointDescriptor> = Vec::with_capacity(required);
    for service in services.iter().filter(|s| s.locations.len() == locations) {
        if selected.len() == required {
            break;
        }
        if selected.iter().any(|s| s.locations == service.locations) {
            continue;
        }
        selected.push(service.clone());
    }

    if selected.len() < required {
        return Err(InsufficientEndpoints {
            mode,
            required,
            locations,
            found: selected.len(),
        });
    }
    Ok(selected)
}
