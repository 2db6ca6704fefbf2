//! Bundle header (6 bytes).
//!
//! Sent verbatim to the device during metadata exchange and covered by the
//! bundle signature.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{DEBUG_VERSION, HEADER_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Field {field} does not fit in 16 bits: {value}")]
    FieldOverflow { field: &'static str, value: usize },
}

/// Release header: version, firmware length and message length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleHeader {
    pub version: u16,
    pub firmware_len: u16,
    pub message_len: u16,
}

impl BundleHeader {
    pub const SIZE: usize = HEADER_SIZE;

    pub fn new(version: u16, firmware_len: usize, message_len: usize) -> Result<Self, HeaderError> {
        let firmware_len = u16::try_from(firmware_len).map_err(|_| HeaderError::FieldOverflow {
            field: "firmware_length",
            value: firmware_len,
        })?;
        let message_len = u16::try_from(message_len).map_err(|_| HeaderError::FieldOverflow {
            field: "message_length",
            value: message_len,
        })?;
        Ok(Self {
            version,
            firmware_len,
            message_len,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.version.to_le_bytes());
        buf[2..4].copy_from_slice(&self.firmware_len.to_le_bytes());
        buf[4..6].copy_from_slice(&self.message_len.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let mut next = || {
            cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| HeaderError::BufferTooSmall {
                    expected: Self::SIZE,
                    actual: data.len(),
                })
        };
        Ok(Self {
            version: next()?,
            firmware_len: next()?,
            message_len: next()?,
        })
    }

    /// Length of `firmware ‖ message ‖ NUL` as declared by this header.
    pub fn plaintext_len(&self) -> usize {
        self.firmware_len as usize + self.message_len as usize + 1
    }

    /// Reserved debug version.
    pub fn is_debug(&self) -> bool {
        self.version == DEBUG_VERSION
    }
}
