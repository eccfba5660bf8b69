//! Configuration Module
//!
//! Configuration loading for the streaming client.

mod settings;

pub use settings::{
    AuthSettings, ClientConfig, ConfigError, ServerSettings, StreamSettings, local_ip,
};
