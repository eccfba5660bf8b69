//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the platform gateway (token endpoint, discovery).
pub mod ports;

/// Application services for authentication, session supervision and consumption.
pub mod services;
