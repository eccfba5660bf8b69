#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! RDP Pricing Stream - Market Price Streaming Client
//!
//! Authenticates against the Refinitiv Data Platform gateway, discovers
//! streaming endpoints, and keeps one (or, in hot standby, two) WebSocket
//! sessions logged in and subscribed, renewing the token before it expires.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and state machines
//!   - `token`: Credentials, token state, renewal schedule
//!   - `topology`: Single / hot standby endpoint selection
//!   - `session`: The session lifecycle as a sans-IO state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Token endpoint and service discovery interfaces
//!   - `services`: Authenticator, session supervisor, message consumer
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `rdp`: reqwest client for the token endpoint and discovery
//!   - `omm`: WebSocket session driver and JSON wire codec
//!   - `broadcast`: Event bus
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!  Authenticator ──TokenAcquired/Refreshed──┐
//!                                           ▼
//!                                    ┌────────────┐
//!                                    │ Event Bus  │◄──Session events──┐
//!                                    └────────────┘                   │
//!                                      │        │                     │
//!                                      ▼        ▼                     │
//!                            Supervisor ──► session1, session2 ───────┘
//!                                      │
//!                          Consumer, Health view
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{
    InboundMessage, ItemSubscription, LoginMode, MessageKind, SessionMachine, SessionState,
};
pub use domain::token::{Credentials, TokenState};
pub use domain::topology::{EndpointDescriptor, SessionId, TopologyMode};

// Application services
pub use application::ports::{DiscoveryError, ServiceDiscoveryPort, TokenEndpointPort};
pub use application::services::{
    AuthError, Authenticator, AuthenticatorConfig, SessionSupervisor, SupervisorConfig,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Event bus
pub use infrastructure::broadcast::{EventBus, StreamEvent};

// Streaming sessions
pub use infrastructure::omm::{StreamSession, StreamSessionConfig, StreamSessionHandle};

// REST adapter
pub use infrastructure::rdp::RdpRestClient;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
