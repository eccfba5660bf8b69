//! RDP HTTP Adapters
//!
//! The token endpoint and streaming service discovery, both served by the
//! platform gateway over HTTPS.

pub mod client;

pub use client::{
    ClientBuildError, DEFAULT_HTTP_TIMEOUT, RdpRestClient, discovery_url, token_url,
};
