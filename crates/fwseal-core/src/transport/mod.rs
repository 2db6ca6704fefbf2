//! Transport layer module.

pub mod mock;
pub mod stream;
pub mod traits;

pub use mock::MockChannel;
pub use stream::{StreamChannel, TimeoutStream, open_port};
pub use traits::{ChannelError, DuplexChannel};
