//! Duplex byte channel abstraction.
//!
//! Defines the `DuplexChannel` trait the transfer session drives, allowing
//! different implementations (serial-over-socket, mock, etc.).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to open channel: {0}")]
    OpenFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Channel closed")]
    Closed,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl ChannelError {
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Blocking, single-owner duplex byte stream to the device.
///
/// Every read carries a timeout; implementations must never block past it.
pub trait DuplexChannel: Send {
    /// Write all bytes. A protocol message is always handed over in one call.
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError>;

    /// Read exactly one byte, waiting at most `timeout`.
    fn read_byte(&mut self, timeout: Duration) -> Result<u8, ChannelError>;

    /// Fill `buf`, allowing `timeout` per byte.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), ChannelError> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte(timeout)?;
        }
        Ok(())
    }

    /// Release the underlying resource. Idempotent.
    fn close(&mut self);

    /// Check whether the channel can still be used.
    fn is_open(&self) -> bool;

    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String {
        "channel".to_string()
    }
}

impl<C: DuplexChannel + ?Sized> DuplexChannel for Box<C> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        (**self).write_all(data)
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, ChannelError> {
        (**self).read_byte(timeout)
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), ChannelError> {
        (**self).read_exact(buf, timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
