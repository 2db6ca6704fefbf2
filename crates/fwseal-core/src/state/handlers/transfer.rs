//! Chunked transfer of the signed region, closed by DONE and the sentinel.

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::{TransferEvent, TransferObserver};
use crate::frame::{FrameChunker, TransferFrame};
use crate::protocol::{ControlToken, describe_byte};
use crate::transport::DuplexChannel;

use super::{HandleResult, HandlerContext};

pub fn handle_transfer<C: DuplexChannel + ?Sized, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, C, O>,
) -> Result<HandleResult, SessionError> {
    ctx.check_cancelled()?;
    ctx.send(&[ControlToken::Chunk.to_byte()])?;
    ctx.expect_ok()?;

    let bundle = ctx.bundle;
    let payload = bundle.signed_region();
    let total_bytes = payload.len();
    let chunker = FrameChunker::new(payload, ctx.config.max_frame_payload)?;
    let total_frames = chunker.total();

    ctx.state.total_frames = total_frames;
    ctx.state.bytes_remaining = total_bytes;
    info!(frames = total_frames, bytes = total_bytes, "Sending firmware");

    let mut bytes_sent = 0;
    for (i, frame) in chunker.enumerate() {
        ctx.check_cancelled()?;
        let index = i + 1;

        ctx.send(&frame.encode())?;
        let response = ctx.read_ack()?;
        if !ControlToken::Ok.matches(response) {
            warn!(index, response = %describe_byte(response), "Frame rejected");
            return Err(SessionError::ChunkRejected { index, response });
        }

        bytes_sent += frame.payload().len();
        ctx.state.frames_sent = index;
        ctx.state.bytes_remaining = total_bytes - bytes_sent;
        debug!(index, total_frames, len = frame.payload().len(), "Frame acknowledged");
        ctx.emit(TransferEvent::Progress {
            frames_sent: index,
            total_frames,
            bytes_sent,
            total_bytes,
        });
    }

    ctx.check_cancelled()?;
    let mut closing = vec![ControlToken::Done.to_byte()];
    closing.extend_from_slice(&TransferFrame::terminator().encode());
    ctx.send(&closing)?;
    debug!("Sent DONE and terminator frame");

    Ok(HandleResult::Continue)
}
