//! Metadata exchange: header and signature ahead of any firmware bytes.

use tracing::info;

use crate::error::SessionError;
use crate::events::TransferObserver;
use crate::protocol::{ControlToken, METADATA_SIZE};
use crate::transport::DuplexChannel;

use super::{HandleResult, HandlerContext};

pub fn handle_metadata<C: DuplexChannel + ?Sized, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, C, O>,
) -> Result<HandleResult, SessionError> {
    ctx.check_cancelled()?;

    let bundle = ctx.bundle;
    let header = bundle.header();

    let mut message = Vec::with_capacity(1 + METADATA_SIZE);
    message.push(ControlToken::Metadata.to_byte());
    message.extend_from_slice(bundle.header_bytes());
    message.extend_from_slice(bundle.signature());

    info!(
        version = header.version,
        firmware_len = header.firmware_len,
        message_len = header.message_len,
        "Sending metadata"
    );
    ctx.send(&message)?;
    ctx.expect_ok()?;

    Ok(HandleResult::Continue)
}
