//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Authenticator`: token acquisition and renewal
//! - `SessionSupervisor`: discovery and the streaming sessions
//! - `consumer`: logs what the sessions receive

pub mod authenticator;
pub mod consumer;
pub mod supervisor;

pub use authenticator::{
    AuthError, Authenticator, AuthenticatorConfig, DEFAULT_AUTH_RETRY_DELAY, DEFAULT_MAX_REDIRECTS,
};
pub use consumer::MessageCategory;
pub use supervisor::{DEFAULT_SHUTDOWN_GRACE, SessionSupervisor, SupervisorConfig};
