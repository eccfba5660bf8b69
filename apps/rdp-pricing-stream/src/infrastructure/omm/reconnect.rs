//! Reconnection Policy
//!
//! Fixed-delay reconnection for streaming sessions. The delay does not grow
//! with consecutive failures; the attempt count is kept for logging and is
//! reset once a login succeeds.

use std::time::Duration;

/// Default delay between a dropped socket and the next connect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before every reconnect.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectConfig {
    /// Configuration with a custom delay.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

/// Fixed-delay reconnection policy.
///
/// ```rust
/// use rdp_pricing_stream::infrastructure::omm::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.next_delay(), Duration::from_secs(3));
/// assert_eq!(policy.next_delay(), Duration::from_secs(3));
/// assert_eq!(policy.attempt_count(), 2);
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt; counts the attempt.
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.config.delay
    }

    /// Reset after a successful login.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}
