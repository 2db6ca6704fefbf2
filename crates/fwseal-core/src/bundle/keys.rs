//! Key material consumed by the bundler and the transfer session.
//!
//! Keys are produced once by the build step and only read here. Nothing in
//! this crate generates or rotates them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use p256::SecretKey;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::constants::{AES_KEY_SIZE, IV_SIZE};

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{what} must be {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),
    #[error("Invalid verifying key: {0}")]
    InvalidVerifyingKey(String),
    #[error("No {0} path configured")]
    MissingPath(&'static str),
    #[error("Malformed build secret: {0}")]
    MalformedSecret(&'static str),
}

/// AES-256 key and CBC IV.
#[derive(Clone)]
pub struct CipherKeys {
    key: [u8; AES_KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl CipherKeys {
    pub fn new(key: [u8; AES_KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self { key, iv }
    }

    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, KeyError> {
        let key: [u8; AES_KEY_SIZE] = key.try_into().map_err(|_| KeyError::InvalidLength {
            what: "AES key",
            expected: AES_KEY_SIZE,
            actual: key.len(),
        })?;
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| KeyError::InvalidLength {
            what: "IV",
            expected: IV_SIZE,
            actual: iv.len(),
        })?;
        Ok(Self { key, iv })
    }

    pub(crate) fn key(&self) -> &[u8; AES_KEY_SIZE] {
        &self.key
    }

    pub(crate) fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl fmt::Debug for CipherKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKeys").finish_non_exhaustive()
    }
}

/// Keys needed to produce a bundle.
#[derive(Clone)]
pub struct SealingKeys {
    pub cipher: CipherKeys,
    pub signing: SigningKey,
}

impl SealingKeys {
    pub fn new(cipher: CipherKeys, signing: SigningKey) -> Self {
        Self { cipher, signing }
    }

    /// Matching keys for verification and decryption.
    pub fn opening_keys(&self) -> OpeningKeys {
        OpeningKeys {
            cipher: self.cipher.clone(),
            verifying: *self.signing.verifying_key(),
        }
    }
}

impl fmt::Debug for SealingKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealingKeys").finish_non_exhaustive()
    }
}

/// Keys needed to verify and open a bundle.
#[derive(Clone)]
pub struct OpeningKeys {
    pub cipher: CipherKeys,
    pub verifying: VerifyingKey,
}

impl OpeningKeys {
    pub fn new(cipher: CipherKeys, verifying: VerifyingKey) -> Self {
        Self { cipher, verifying }
    }
}

impl fmt::Debug for OpeningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpeningKeys")
            .field("verifying", &self.verifying)
            .finish_non_exhaustive()
    }
}

/// Locations of the key material written by the build step.
///
/// Explicit per-key paths win over the combined `secret` file.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPaths {
    /// Raw 32-byte AES key.
    pub aes_key: Option<PathBuf>,
    /// Raw 16-byte IV.
    pub iv: Option<PathBuf>,
    /// ECDSA P-256 private key (PKCS#8 or SEC1 DER).
    pub signing_key: Option<PathBuf>,
    /// ECDSA P-256 public key (SPKI DER or SEC1 point).
    pub verifying_key: Option<PathBuf>,
    /// Combined build output: AES key, a newline, then the private key DER.
    pub secret: Option<PathBuf>,
}

impl KeyPaths {
    pub fn load_cipher_keys(&self) -> Result<CipherKeys, KeyError> {
        let key = match (self.aes_key.as_deref(), self.secret.as_deref()) {
            (Some(path), _) => read_fixed(path, "AES key", AES_KEY_SIZE)?,
            (None, Some(path)) => split_secret(&read_file(path)?)?.0.to_vec(),
            (None, None) => return Err(KeyError::MissingPath("AES key")),
        };
        let iv_path = self.iv.as_deref().ok_or(KeyError::MissingPath("IV"))?;
        let iv = read_fixed(iv_path, "IV", IV_SIZE)?;
        CipherKeys::from_slices(&key, &iv)
    }

    pub fn load_sealing_keys(&self) -> Result<SealingKeys, KeyError> {
        let cipher = self.load_cipher_keys()?;
        let signing = self
            .load_signing_key()?
            .ok_or(KeyError::MissingPath("signing key"))?;
        Ok(SealingKeys::new(cipher, signing))
    }

    /// Falls back to deriving the public key when only the signing key is
    /// configured.
    pub fn load_opening_keys(&self) -> Result<OpeningKeys, KeyError> {
        let cipher = self.load_cipher_keys()?;
        let verifying = match self.verifying_key.as_deref() {
            Some(path) => parse_verifying_key(&read_file(path)?)?,
            None => *self
                .load_signing_key()?
                .ok_or(KeyError::MissingPath("verifying key"))?
                .verifying_key(),
        };
        Ok(OpeningKeys::new(cipher, verifying))
    }

    fn load_signing_key(&self) -> Result<Option<SigningKey>, KeyError> {
        if let Some(path) = self.signing_key.as_deref() {
            let signing = parse_signing_key(&read_file(path)?)?;
            debug!(path = %path.display(), "Loaded signing key");
            return Ok(Some(signing));
        }
        if let Some(path) = self.secret.as_deref() {
            let data = read_file(path)?;
            let signing = parse_signing_key(split_secret(&data)?.1)?;
            debug!(path = %path.display(), "Loaded signing key from build secret");
            return Ok(Some(signing));
        }
        Ok(None)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, KeyError> {
    fs::read(path).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a raw key file, tolerating the trailing newline the build step
/// appends.
fn read_fixed(path: &Path, what: &'static str, expected: usize) -> Result<Vec<u8>, KeyError> {
    let mut data = read_file(path)?;
    if data.len() > expected {
        let tail = &data[expected..];
        if tail == b"\n" || tail == b"\r\n" {
            data.truncate(expected);
        }
    }
    if data.len() != expected {
        return Err(KeyError::InvalidLength {
            what,
            expected,
            actual: data.len(),
        });
    }
    Ok(data)
}

/// Split the combined build output into the AES key and the private key DER.
fn split_secret(data: &[u8]) -> Result<(&[u8], &[u8]), KeyError> {
    if data.len() <= AES_KEY_SIZE {
        return Err(KeyError::MalformedSecret("shorter than the AES key"));
    }
    let (key, rest) = data.split_at(AES_KEY_SIZE);
    let der = rest
        .strip_prefix(b"\r\n")
        .or_else(|| rest.strip_prefix(b"\n"))
        .ok_or(KeyError::MalformedSecret("no newline after the AES key"))?;
    if der.is_empty() {
        return Err(KeyError::MalformedSecret("missing private key"));
    }
    Ok((key, der))
}

fn strip_newline(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\n").unwrap_or(data)
}

pub fn parse_signing_key(der: &[u8]) -> Result<SigningKey, KeyError> {
    for candidate in [der, strip_newline(der)] {
        if let Ok(key) = SigningKey::from_pkcs8_der(candidate) {
            return Ok(key);
        }
        if let Ok(secret) = SecretKey::from_sec1_der(candidate) {
            return Ok(SigningKey::from(secret));
        }
    }
    Err(KeyError::InvalidSigningKey(
        "not a PKCS#8 or SEC1 DER encoded P-256 key".into(),
    ))
}

pub fn parse_verifying_key(data: &[u8]) -> Result<VerifyingKey, KeyError> {
    for candidate in [data, strip_newline(data)] {
        if let Ok(key) = VerifyingKey::from_public_key_der(candidate) {
            return Ok(key);
        }
        if let Ok(key) = VerifyingKey::from_sec1_bytes(candidate) {
            return Ok(key);
        }
    }
    Err(KeyError::InvalidVerifyingKey(
        "not an SPKI DER or SEC1 encoded P-256 point".into(),
    ))
}
