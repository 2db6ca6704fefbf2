//! Protected bundle layout plus encode and verify/decode.
//!
//! ```text
//! offset 0  : signature        64 bytes  ECDSA P-256 / SHA-256, r‖s
//! offset 64 : version           2 bytes  LE
//! offset 66 : firmware_length   2 bytes  LE
//! offset 68 : message_length    2 bytes  LE
//! offset 70 : ciphertext        AES-256-CBC(firmware ‖ message ‖ NUL), PKCS#7
//! ```
//!
//! The signature covers `header ‖ ciphertext` exactly, never the plaintext.

use std::fs;
use std::path::Path;

use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use p256::ecdsa::Signature;
use p256::ecdsa::signature::{DigestSigner, DigestVerifier};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use super::keys::{CipherKeys, OpeningKeys, SealingKeys};
use crate::protocol::constants::*;
use crate::protocol::header::{BundleHeader, HeaderError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Input field checked against a size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    Firmware,
    Message,
}

impl std::fmt::Display for SizeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeField::Firmware => write!(f, "firmware"),
            SizeField::Message => write!(f, "message"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("{field} is {len} bytes, limit is {max}")]
    SizeLimitExceeded {
        field: SizeField,
        len: usize,
        max: usize,
    },
    #[error("Bundle too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Signature verification failed")]
    Authentication,
    #[error("Malformed padding")]
    Padding,
    #[error("Integrity check failed: {0}")]
    Integrity(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
}

/// Signed, encrypted firmware package. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedBundle {
    data: Vec<u8>,
    header: BundleHeader,
}

impl ProtectedBundle {
    /// Wrap raw bundle bytes, checking only the fixed layout. Use
    /// [`verify_and_decode`] before trusting the contents.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, BundleError> {
        let minimum = CIPHERTEXT_OFFSET + BLOCK_SIZE;
        if data.len() < minimum {
            return Err(BundleError::Truncated {
                expected: minimum,
                actual: data.len(),
            });
        }
        let header = BundleHeader::from_bytes(&data[HEADER_OFFSET..CIPHERTEXT_OFFSET])?;
        Ok(Self { data, header })
    }

    pub fn read_from<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read(path)?;
        Ok(Self::from_bytes(data)?)
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }

    pub fn signature(&self) -> &[u8] {
        &self.data[..SIGNATURE_SIZE]
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.data[HEADER_OFFSET..CIPHERTEXT_OFFSET]
    }

    /// Parsed header. Unauthenticated until verified.
    pub fn header(&self) -> BundleHeader {
        self.header
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.data[CIPHERTEXT_OFFSET..]
    }

    /// `header ‖ ciphertext`, the bytes covered by the signature.
    pub fn signed_region(&self) -> &[u8] {
        &self.data[HEADER_OFFSET..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Firmware and release metadata recovered from a verified bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFirmware {
    pub version: u16,
    pub firmware: Vec<u8>,
    pub message: String,
}

/// Check input sizes. Runs before any cryptographic work.
pub fn check_limits(firmware: &[u8], message: &str) -> Result<(), BundleError> {
    if firmware.len() > MAX_FIRMWARE_SIZE {
        return Err(BundleError::SizeLimitExceeded {
            field: SizeField::Firmware,
            len: firmware.len(),
            max: MAX_FIRMWARE_SIZE,
        });
    }
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(BundleError::SizeLimitExceeded {
            field: SizeField::Message,
            len: message.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Encrypt and sign `firmware ‖ message` into a bundle.
pub fn encode(
    firmware: &[u8],
    version: u16,
    message: &str,
    keys: &SealingKeys,
) -> Result<ProtectedBundle, BundleError> {
    check_limits(firmware, message)?;

    let header = BundleHeader::new(version, firmware.len(), message.len())?;

    let mut plaintext = Vec::with_capacity(header.plaintext_len());
    plaintext.extend_from_slice(firmware);
    plaintext.extend_from_slice(message.as_bytes());
    plaintext.push(MESSAGE_TERMINATOR);

    let ciphertext = encrypt(&keys.cipher, &plaintext);

    let mut data = Vec::with_capacity(CIPHERTEXT_OFFSET + ciphertext.len());
    data.extend_from_slice(&[0u8; SIGNATURE_SIZE]);
    data.extend_from_slice(&header.to_bytes());
    data.extend_from_slice(&ciphertext);

    let signature: Signature = keys
        .signing
        .try_sign_digest(Sha256::new_with_prefix(&data[HEADER_OFFSET..]))
        .map_err(|e| BundleError::Signing(e.to_string()))?;
    data[..SIGNATURE_SIZE].copy_from_slice(&signature.to_bytes());

    debug!(
        version,
        firmware_len = firmware.len(),
        message_len = message.len(),
        bundle_len = data.len(),
        "Encoded bundle"
    );
    Ok(ProtectedBundle { data, header })
}

/// Check only the signature over `header ‖ ciphertext`.
pub fn verify_signature(bundle: &ProtectedBundle, keys: &OpeningKeys) -> Result<(), BundleError> {
    let signature =
        Signature::from_slice(bundle.signature()).map_err(|_| BundleError::Authentication)?;
    keys.verifying
        .verify_digest(Sha256::new_with_prefix(bundle.signed_region()), &signature)
        .map_err(|_| {
            warn!("Bundle signature rejected");
            BundleError::Authentication
        })
}

/// Verify the signature, then decrypt and cross-check against the header.
///
/// Nothing is decrypted unless the signature holds, and no plaintext is
/// returned unless every check passes.
pub fn verify_and_decode(
    bundle: &ProtectedBundle,
    keys: &OpeningKeys,
) -> Result<DecodedFirmware, BundleError> {
    verify_signature(bundle, keys)?;

    let header = bundle.header();
    let mut plaintext = decrypt(&keys.cipher, bundle.ciphertext())?;

    if plaintext.len() != header.plaintext_len() {
        return Err(BundleError::Integrity(format!(
            "plaintext is {} bytes, header declares {}",
            plaintext.len(),
            header.plaintext_len()
        )));
    }
    if plaintext.pop() != Some(MESSAGE_TERMINATOR) {
        return Err(BundleError::Integrity("missing message terminator".into()));
    }

    let message = plaintext.split_off(header.firmware_len as usize);
    let message = String::from_utf8(message)
        .map_err(|_| BundleError::Integrity("release message is not UTF-8".into()))?;

    Ok(DecodedFirmware {
        version: header.version,
        firmware: plaintext,
        message,
    })
}

fn encrypt(keys: &CipherKeys, plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(
        GenericArray::from_slice(keys.key()),
        GenericArray::from_slice(keys.iv()),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn decrypt(keys: &CipherKeys, ciphertext: &[u8]) -> Result<Vec<u8>, BundleError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(BundleError::Padding);
    }
    Aes256CbcDec::new(
        GenericArray::from_slice(keys.key()),
        GenericArray::from_slice(keys.iv()),
    )
    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    .map_err(|_| BundleError::Padding)
}
