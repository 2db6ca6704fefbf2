//! fwseal-core: signed, encrypted firmware bundles and their transfer to a
//! bootloader over a duplex byte channel.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, control tokens, bundle header
//! - **Bundle**: AES-256-CBC + ECDSA P-256 bundle codec, key material, bundler
//! - **Frame**: Length-prefixed transfer frames and chunking
//! - **Transport**: Duplex channel abstraction (stream sockets, mock)
//! - **State**: Phase machine and per-phase handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//! - **Config**: TOML tool configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fwseal_core::config::ToolConfig;
//! use fwseal_core::session::TransferSession;
//! use fwseal_core::transport::open_port;
//!
//! let config = ToolConfig::load_from_file("fwseal.toml").expect("config");
//! let keys = Arc::new(config.keys.load_opening_keys().expect("keys"));
//! let bundle = std::fs::read("firmware.bundle").expect("bundle");
//!
//! let channel = open_port("unix:/tmp/bootloader.sock").expect("port");
//! let mut session = TransferSession::new(channel, config.transfer, keys);
//! session.run(&bundle).expect("update failed");
//! ```

pub mod bundle;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use bundle::{
    BundleError, Bundler, DecodedFirmware, KeyPaths, OpeningKeys, ProtectedBundle, SealingKeys,
    encode, verify_and_decode,
};
pub use config::{ConfigError, ToolConfig, TransferConfig};
pub use error::SessionError;
pub use events::{LogLevel, NullObserver, TracingObserver, TransferEvent, TransferObserver};
pub use frame::{FrameError, TransferFrame};
pub use protocol::{BundleHeader, ControlToken};
pub use session::{CancelToken, TransferReport, TransferSession};
pub use state::{BackoffPolicy, Phase, SessionState};
pub use transport::{ChannelError, DuplexChannel, MockChannel, StreamChannel};
