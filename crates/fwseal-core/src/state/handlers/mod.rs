//! Phase handlers - one driving function per protocol phase.
//!
//! This module is split into submodules by phase:
//! - `handshake`: UPDATE announcement and reply polling
//! - `metadata`: header and signature exchange
//! - `transfer`: CHUNK token, data frames and the closing sentinel
//! - `completion`: final acknowledgment

mod completion;
mod handshake;
mod metadata;
mod transfer;

use crate::bundle::ProtectedBundle;
use crate::config::TransferConfig;
use crate::error::SessionError;
use crate::events::{LogLevel, TransferEvent, TransferObserver};
use crate::protocol::ControlToken;
use crate::session::CancelToken;
use crate::state::machine::{Phase, SessionState};
use crate::transport::DuplexChannel;

use completion::handle_completion;
use handshake::handle_handshake;
use metadata::handle_metadata;
use transfer::handle_transfer;

/// Result of driving one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    /// Phase finished; advance to the next one.
    Continue,
    /// Final acknowledgment received.
    Complete,
}

/// Handler context containing all resources for one session run.
pub struct HandlerContext<'a, C: DuplexChannel + ?Sized, O: TransferObserver> {
    pub channel: &'a mut C,
    pub observer: &'a O,
    pub state: &'a mut SessionState,
    pub config: &'a TransferConfig,
    /// Verified bundle being transferred.
    pub bundle: &'a ProtectedBundle,
    pub cancel: &'a CancelToken,
}

impl<'a, C: DuplexChannel + ?Sized, O: TransferObserver> HandlerContext<'a, C, O> {
    pub(crate) fn emit(&self, event: TransferEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(TransferEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    /// Hand one complete protocol message to the channel.
    pub(crate) fn send(&mut self, message: &[u8]) -> Result<(), SessionError> {
        self.channel.write_all(message)?;
        Ok(())
    }

    /// Wait for one acknowledgment byte within the ACK timeout.
    pub(crate) fn read_ack(&mut self) -> Result<u8, SessionError> {
        let timeout = self.config.ack_timeout();
        match self.channel.read_byte(timeout) {
            Ok(byte) => {
                self.state.last_ack = Some(byte);
                self.emit(TransferEvent::AckReceived { byte });
                Ok(byte)
            }
            Err(e) if e.is_timeout() => Err(SessionError::Timeout {
                phase: self.state.phase,
                timeout_ms: self.config.ack_timeout_ms,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Require the next byte to be OK.
    pub(crate) fn expect_ok(&mut self) -> Result<(), SessionError> {
        let received = self.read_ack()?;
        if ControlToken::Ok.matches(received) {
            return Ok(());
        }
        Err(SessionError::ProtocolViolation {
            phase: self.state.phase,
            expected: ControlToken::Ok,
            received,
        })
    }
}

/// Drive the current phase to its end.
pub fn handle_phase<C: DuplexChannel + ?Sized, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, C, O>,
) -> Result<HandleResult, SessionError> {
    match ctx.state.phase {
        Phase::Idle => Ok(HandleResult::Continue),
        Phase::Handshaking => handle_handshake(ctx),
        Phase::MetadataExchange => handle_metadata(ctx),
        Phase::Transferring => handle_transfer(ctx),
        Phase::AwaitingCompletionAck => handle_completion(ctx),
        Phase::Completed | Phase::Aborted => Err(SessionError::NotReusable),
    }
}
