//! Frame module - transfer frame codec and chunking.

pub mod chunk;
pub mod codec;

pub use chunk::{FrameChunker, chunk_count};
pub use codec::{FrameError, TransferFrame, validate_max_payload};
