//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-wide plumbing.

/// RDP HTTP adapters (token endpoint, service discovery).
pub mod rdp;

/// OMM WebSocket session driver and wire codec.
pub mod omm;

/// Event bus between the authenticator, supervisor, sessions and consumers.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
