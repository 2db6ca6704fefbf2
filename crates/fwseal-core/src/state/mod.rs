//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandleResult, HandlerContext, handle_phase};
pub use machine::{BackoffPolicy, Phase, SessionState};
