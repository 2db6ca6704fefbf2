//! Session-level error taxonomy.
//!
//! Every failure is fatal to the session that raised it. Callers wanting a
//! retry create a fresh session.

use thiserror::Error;

use crate::bundle::BundleError;
use crate::config::ConfigError;
use crate::frame::FrameError;
use crate::protocol::{ControlToken, describe_byte};
use crate::state::Phase;
use crate::transport::ChannelError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Signature, padding, integrity or layout failure of the bundle.
    #[error("Bundle rejected: {0}")]
    Bundle(#[from] BundleError),

    #[error("Version 0 is reserved for debug builds")]
    ReservedVersion,

    #[error("Device did not answer the handshake after {attempts} polls")]
    HandshakeTimeout { attempts: u32 },

    #[error("Protocol violation in {phase}: expected {expected}, got {}", describe_byte(*.received))]
    ProtocolViolation {
        phase: Phase,
        expected: ControlToken,
        received: u8,
    },

    /// `index` is the 1-based number of the rejected data frame.
    #[error("Device rejected frame {index} with {}", describe_byte(*.response))]
    ChunkRejected { index: usize, response: u8 },

    #[error("No acknowledgment in {phase} within {timeout_ms}ms")]
    Timeout { phase: Phase, timeout_ms: u64 },

    #[error("Framing error: {0}")]
    Framing(#[from] FrameError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Session already ran; create a new session to retry")]
    NotReusable,

    #[error("Boot can only be requested after a completed transfer (phase: {phase})")]
    BootUnavailable { phase: Phase },
}

impl SessionError {
    /// Cryptographic tamper or corruption signal.
    pub fn is_tamper(&self) -> bool {
        matches!(
            self,
            SessionError::Bundle(
                BundleError::Authentication | BundleError::Padding | BundleError::Integrity(_)
            )
        )
    }
}
