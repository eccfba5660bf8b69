//! Application Ports (Driven)
//!
//! Interfaces the application services use to reach the platform gateway.
//! Infrastructure adapters implement them; tests substitute in-memory fakes.

mod discovery_port;
mod token_endpoint_port;

pub use discovery_port::{DiscoveryError, ServiceDiscoveryPort};
pub use token_endpoint_port::{TokenEndpointPort, TokenRequestError};
