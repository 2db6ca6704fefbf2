//! Tool configuration, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bundle::KeyPaths;
use crate::protocol::DEFAULT_MAX_FRAME_PAYLOAD;
use crate::state::BackoffPolicy;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_frame_payload must be between 1 and 65535, got {0}")]
    FramePayload(usize),

    #[error("handshake_attempts must be at least 1")]
    NoHandshakeAttempts,

    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
}

/// Knobs for a single transfer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest payload carried by one frame.
    pub max_frame_payload: usize,
    /// How long to wait for each acknowledgment.
    pub ack_timeout_ms: u64,
    /// Poll budget for the initial handshake.
    pub handshake_attempts: u32,
    pub handshake_poll_timeout_ms: u64,
    pub handshake_backoff: BackoffPolicy,
    pub handshake_backoff_ms: u64,
    pub handshake_backoff_max_ms: u64,
    /// Permit version 0 (debug) bundles.
    pub allow_debug_version: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            ack_timeout_ms: 2000,
            handshake_attempts: 50,
            handshake_poll_timeout_ms: 100,
            handshake_backoff: BackoffPolicy::Fixed,
            handshake_backoff_ms: 100,
            handshake_backoff_max_ms: 2000,
            allow_debug_version: false,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_payload == 0 || self.max_frame_payload > u16::MAX as usize {
            return Err(ConfigError::FramePayload(self.max_frame_payload));
        }
        if self.handshake_attempts == 0 {
            return Err(ConfigError::NoHandshakeAttempts);
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("ack_timeout_ms"));
        }
        if self.handshake_poll_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("handshake_poll_timeout_ms"));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn handshake_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_timeout_ms)
    }

    /// Pause after the `attempt`-th unanswered handshake poll.
    pub fn handshake_delay(&self, attempt: u32) -> Duration {
        self.handshake_backoff.delay(
            attempt,
            Duration::from_millis(self.handshake_backoff_ms),
            Duration::from_millis(self.handshake_backoff_max_ms),
        )
    }
}

/// Top-level configuration file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub keys: KeyPaths,
    pub transfer: TransferConfig,
}

impl ToolConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ToolConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
