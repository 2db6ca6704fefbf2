//! Bundler - turns (firmware, version, message) into a distributable bundle.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use super::codec::{BundleError, ProtectedBundle, check_limits, encode};
use super::keys::SealingKeys;

/// Signs and encrypts firmware with a fixed set of keys.
///
/// Inputs within the size limits always produce a verifiable bundle; inputs
/// outside them fail before any cryptographic operation runs.
#[derive(Debug, Clone)]
pub struct Bundler {
    keys: SealingKeys,
}

impl Bundler {
    pub fn new(keys: SealingKeys) -> Self {
        Self { keys }
    }

    pub fn bundle(
        &self,
        firmware: &[u8],
        version: u16,
        message: &str,
    ) -> Result<ProtectedBundle, BundleError> {
        encode(firmware, version, message, &self.keys)
    }

    /// Read a firmware image, bundle it and write the result.
    #[instrument(skip_all, fields(version = version))]
    pub fn protect_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        infile: P,
        outfile: Q,
        version: u16,
        message: &str,
    ) -> Result<ProtectedBundle> {
        let infile = infile.as_ref();
        let outfile = outfile.as_ref();

        let firmware = fs::read(infile)
            .with_context(|| format!("reading firmware image {}", infile.display()))?;
        check_limits(&firmware, message)?;

        let bundle = self.bundle(&firmware, version, message)?;
        bundle
            .write_to(outfile)
            .with_context(|| format!("writing bundle {}", outfile.display()))?;

        info!(
            version,
            firmware_len = firmware.len(),
            bundle_len = bundle.len(),
            outfile = %outfile.display(),
            "Firmware protected"
        );
        Ok(bundle)
    }
}
