//! Handshake: announce UPDATE, then poll for the device's echo.

use std::thread;

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::{LogLevel, TransferObserver};
use crate::protocol::{ControlToken, describe_byte};
use crate::transport::DuplexChannel;

use super::{HandleResult, HandlerContext};

pub fn handle_handshake<C: DuplexChannel + ?Sized, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, C, O>,
) -> Result<HandleResult, SessionError> {
    let attempts = ctx.config.handshake_attempts;
    let poll_timeout = ctx.config.handshake_poll_timeout();

    ctx.check_cancelled()?;
    ctx.send(&[ControlToken::Update.to_byte()])?;
    info!(attempts, "Sent UPDATE, waiting for device");
    ctx.log(LogLevel::Info, "Waiting for bootloader handshake");

    for attempt in 1..=attempts {
        ctx.check_cancelled()?;

        match ctx.channel.read_byte(poll_timeout) {
            Ok(byte) if ControlToken::Update.matches(byte) => {
                ctx.state.last_ack = Some(byte);
                info!(attempt, "Handshake acknowledged");
                return Ok(HandleResult::Continue);
            }
            Ok(byte) => {
                debug!(attempt, byte = %describe_byte(byte), "Ignoring unexpected handshake byte");
            }
            Err(e) if e.is_timeout() => {
                debug!(attempt, "No handshake reply yet");
            }
            Err(e) => return Err(e.into()),
        }

        if attempt < attempts {
            thread::sleep(ctx.config.handshake_delay(attempt));
        }
    }

    warn!(attempts, "Handshake budget exhausted");
    Err(SessionError::HandshakeTimeout { attempts })
}
