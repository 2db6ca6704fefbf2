//! Data frame wire format.
//!
//! ```text
//! +----------------+------------------+
//! | LENGTH (2B BE) | PAYLOAD (N bytes)|
//! +----------------+------------------+
//! ```
//!
//! A zero-length frame is the end-of-transfer sentinel.

use std::io::Cursor;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::protocol::constants::FRAME_LENGTH_PREFIX;
use crate::transport::{ChannelError, DuplexChannel};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {actual} bytes, need at least 2")]
    TooShort { actual: usize },
    #[error("Payload of {len} bytes exceeds frame limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Frame declares {declared} payload bytes, {available} available")]
    LengthMismatch { declared: usize, available: usize },
    #[error("Frame payload limit must be between 1 and 65535, got {0}")]
    InvalidMaxPayload(usize),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Check a configured payload limit against what the length prefix can carry.
pub fn validate_max_payload(max_payload: usize) -> Result<(), FrameError> {
    if max_payload == 0 || max_payload > u16::MAX as usize {
        return Err(FrameError::InvalidMaxPayload(max_payload));
    }
    Ok(())
}

/// A single length-prefixed transfer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFrame {
    payload: Vec<u8>,
}

impl TransferFrame {
    /// Build a data frame, enforcing the payload limit.
    pub fn new(payload: &[u8], max_payload: usize) -> Result<Self, FrameError> {
        validate_max_payload(max_payload)?;
        if payload.len() > max_payload {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }
        Ok(Self {
            payload: payload.to_vec(),
        })
    }

    /// The zero-length end-of-transfer frame.
    pub fn terminator() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encoded size on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_LENGTH_PREFIX + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        // Payload length was bounded by a u16 limit at construction.
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode exactly one frame; the buffer must hold nothing else.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_LENGTH_PREFIX {
            return Err(FrameError::TooShort {
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let declared = cursor
            .read_u16::<BigEndian>()
            .map_err(|_| FrameError::TooShort {
                actual: bytes.len(),
            })? as usize;
        let available = bytes.len() - FRAME_LENGTH_PREFIX;
        if declared != available {
            return Err(FrameError::LengthMismatch {
                declared,
                available,
            });
        }
        Ok(Self {
            payload: bytes[FRAME_LENGTH_PREFIX..].to_vec(),
        })
    }

    /// Read one frame from a channel, giving each byte `timeout`.
    ///
    /// A payload cut short by a timeout is a `LengthMismatch`, not a channel
    /// timeout, so a partially received frame is never mistaken for silence.
    pub fn read_from<C: DuplexChannel + ?Sized>(
        channel: &mut C,
        max_payload: usize,
        timeout: Duration,
    ) -> Result<Self, FrameError> {
        let mut prefix = [0u8; FRAME_LENGTH_PREFIX];
        for (i, slot) in prefix.iter_mut().enumerate() {
            *slot = match channel.read_byte(timeout) {
                Ok(byte) => byte,
                Err(e) if e.is_timeout() && i > 0 => {
                    return Err(FrameError::TooShort { actual: i });
                }
                Err(e) => return Err(e.into()),
            };
        }

        let declared = u16::from_be_bytes(prefix) as usize;
        if declared > max_payload {
            return Err(FrameError::PayloadTooLarge {
                len: declared,
                max: max_payload,
            });
        }

        let mut payload = Vec::with_capacity(declared);
        while payload.len() < declared {
            match channel.read_byte(timeout) {
                Ok(byte) => payload.push(byte),
                Err(e) if e.is_timeout() => {
                    return Err(FrameError::LengthMismatch {
                        declared,
                        available: payload.len(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Self { payload })
    }
}
