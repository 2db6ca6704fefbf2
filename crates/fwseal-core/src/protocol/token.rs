//! Control token parsing and matching.
//!
//! Every protocol step is opened or acknowledged with a single ASCII byte.
//! This module gives those bytes a type.

use std::fmt;

use super::constants::*;

/// Control token exchanged between host and bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlToken {
    Update,
    Ok,
    Error,
    Metadata,
    Chunk,
    Done,
    Boot,
}

impl ControlToken {
    /// Parse a byte read from the device. Unknown bytes yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            TOKEN_UPDATE => Some(Self::Update),
            TOKEN_OK => Some(Self::Ok),
            TOKEN_ERROR => Some(Self::Error),
            TOKEN_METADATA => Some(Self::Metadata),
            TOKEN_CHUNK => Some(Self::Chunk),
            TOKEN_DONE => Some(Self::Done),
            TOKEN_BOOT => Some(Self::Boot),
            _ => None,
        }
    }

    /// Wire byte.
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Update => TOKEN_UPDATE,
            Self::Ok => TOKEN_OK,
            Self::Error => TOKEN_ERROR,
            Self::Metadata => TOKEN_METADATA,
            Self::Chunk => TOKEN_CHUNK,
            Self::Done => TOKEN_DONE,
            Self::Boot => TOKEN_BOOT,
        }
    }

    /// Check whether a raw response byte is this token.
    pub fn matches(self, byte: u8) -> bool {
        self.to_byte() == byte
    }
}

impl fmt::Display for ControlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Update => "UPDATE",
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Metadata => "METADATA",
            Self::Chunk => "CHUNK",
            Self::Done => "DONE",
            Self::Boot => "BOOT",
        };
        write!(f, "{}", name)
    }
}

/// Render a raw response byte for logs: the token name if known, otherwise
/// the printable character or hex value.
pub fn describe_byte(byte: u8) -> String {
    match ControlToken::from_byte(byte) {
        Some(token) => format!("{} ('{}')", token, byte as char),
        None if byte.is_ascii_graphic() => format!("'{}' (0x{:02X})", byte as char, byte),
        None => format!("0x{:02X}", byte),
    }
}
