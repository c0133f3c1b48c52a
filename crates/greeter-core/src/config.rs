//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::HEARTBEAT_MESSAGE;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Heartbeat interval must be greater than zero")]
    ZeroInterval,
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Per-session settings.
///
/// Shared read-only by every session a transport spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time between two heartbeats. The first one is sent one full
    /// interval after the session starts.
    #[serde(default = "default_interval")]
    pub heartbeat_interval: Duration,

    /// Marker sent on every heartbeat.
    #[serde(default = "default_message")]
    pub heartbeat_message: String,
}

fn default_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

fn default_message() -> String {
    HEARTBEAT_MESSAGE.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_interval(),
            heartbeat_message: default_message(),
        }
    }
}

impl SessionConfig {
    /// Create a config with a custom heartbeat interval.
    #[must_use]
    pub fn with_interval(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            ..Self::default()
        }
    }

    /// Check the config before handing it to a session.
    ///
    /// # Errors
    /// Returns error if the heartbeat interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}
