//! Participant configuration.

use std::time::Duration;

/// Participant timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long an acquire may wait for a grant or denial.
    pub acquire_timeout: Duration,
    /// How long a release may wait for confirmation.
    pub release_timeout: Duration,
    /// Longest silence before a tick sends a heartbeat.
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(2),
            release_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}
