//! Protocol constants shared by the bundler and the transfer session.
//!
//! Sizes mirror what the bootloader accepts; control tokens are the single
//! ASCII bytes it dispatches on.

// ============================================================================
// Input Limits
// ============================================================================

/// Largest firmware image the bootloader can stage.
pub const MAX_FIRMWARE_SIZE: usize = 32768;

/// Largest release message, in encoded bytes (terminator excluded).
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Version 0 is reserved for debug builds.
pub const DEBUG_VERSION: u16 = 0;

// ============================================================================
// Bundle Layout
// ============================================================================

/// ECDSA P-256 signature, fixed-width r‖s.
pub const SIGNATURE_SIZE: usize = 64;

/// version u16 ‖ firmware_length u16 ‖ message_length u16, all LE.
pub const HEADER_SIZE: usize = 6;

/// Offset of the header inside a bundle.
pub const HEADER_OFFSET: usize = SIGNATURE_SIZE;

/// Offset of the ciphertext inside a bundle.
pub const CIPHERTEXT_OFFSET: usize = SIGNATURE_SIZE + HEADER_SIZE;

/// AES-256 key length.
pub const AES_KEY_SIZE: usize = 32;

/// CBC initialization vector length.
pub const IV_SIZE: usize = 16;

/// AES block size; ciphertext is always a non-zero multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// Appended after the release message before padding.
pub const MESSAGE_TERMINATOR: u8 = 0x00;

// ============================================================================
// Framing
// ============================================================================

/// Length prefix of a data frame (big-endian u16).
pub const FRAME_LENGTH_PREFIX: usize = 2;

/// Default frame payload size; the bootloader rejects anything larger.
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 256;

// ============================================================================
// Control Tokens (Host <-> Device)
// ============================================================================

/// Begin update; the device echoes it once it is ready.
pub const TOKEN_UPDATE: u8 = b'U';

/// Positive acknowledgment.
pub const TOKEN_OK: u8 = b'O';

/// Negative acknowledgment.
pub const TOKEN_ERROR: u8 = b'E';

/// Metadata (header and signature) follows.
pub const TOKEN_METADATA: u8 = b'M';

/// Data frames follow.
pub const TOKEN_CHUNK: u8 = b'C';

/// End of data; precedes the zero-length sentinel frame.
pub const TOKEN_DONE: u8 = b'D';

/// Boot the installed firmware.
pub const TOKEN_BOOT: u8 = b'B';

/// Size of the metadata message following the METADATA token.
pub const METADATA_SIZE: usize = HEADER_SIZE + SIGNATURE_SIZE;

/// Round `len` up to the padded ciphertext size (PKCS#7 always adds a block
/// when the input is already aligned).
#[inline]
pub const fn padded_len(len: usize) -> usize {
    (len / BLOCK_SIZE + 1) * BLOCK_SIZE
}
