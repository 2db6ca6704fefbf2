//! Final acknowledgment after the terminator frame.

use tracing::info;

use crate::error::SessionError;
use crate::events::{LogLevel, TransferObserver};
use crate::transport::DuplexChannel;

use super::{HandleResult, HandlerContext};

pub fn handle_completion<C: DuplexChannel + ?Sized, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, C, O>,
) -> Result<HandleResult, SessionError> {
    ctx.expect_ok()?;

    info!(frames = ctx.state.frames_sent, "Device confirmed firmware");
    ctx.log(LogLevel::Info, "Firmware accepted by device");
    Ok(HandleResult::Complete)
}
