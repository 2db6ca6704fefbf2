//! Protocol module - wire-level definitions.

pub mod constants;
pub mod header;
pub mod token;

pub use constants::*;
pub use header::{BundleHeader, HeaderError};
pub use token::{ControlToken, describe_byte};
