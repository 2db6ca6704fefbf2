//! Bundle module - protected firmware format, keys and bundler.

pub mod bundler;
pub mod codec;
pub mod keys;

pub use bundler::Bundler;
pub use codec::{
    BundleError, DecodedFirmware, ProtectedBundle, SizeField, check_limits, encode,
    verify_and_decode, verify_signature,
};
pub use keys::{CipherKeys, KeyError, KeyPaths, OpeningKeys, SealingKeys};
