//! Transfer session - high-level orchestrator for one firmware update.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::bundle::{OpeningKeys, ProtectedBundle, verify_and_decode};
use crate::config::TransferConfig;
use crate::error::SessionError;
use crate::events::{PacketDirection, TracingObserver, TransferEvent, TransferObserver};
use crate::frame::chunk_count;
use crate::protocol::ControlToken;
use crate::state::{HandleResult, HandlerContext, Phase, SessionState, handle_phase};
use crate::transport::{ChannelError, DuplexChannel};

/// Cooperative cancellation flag, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub version: u16,
    pub firmware_len: usize,
    pub message: String,
    /// Data frames acknowledged, excluding the terminator.
    pub frames_sent: usize,
    pub bytes_sent: usize,
}

/// Transfer session - drives one bundle over one channel.
///
/// The session owns the channel and closes it on abort, after
/// [`request_boot`](Self::request_boot), on [`close`](Self::close) and on drop.
pub struct TransferSession<C: DuplexChannel, O: TransferObserver = TracingObserver> {
    channel: Option<C>,
    config: TransferConfig,
    keys: Arc<OpeningKeys>,
    observer: Arc<O>,
    state: SessionState,
    cancel: CancelToken,
}

impl<C: DuplexChannel> TransferSession<C, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(channel: C, config: TransferConfig, keys: Arc<OpeningKeys>) -> Self {
        Self::with_observer(channel, config, keys, Arc::new(TracingObserver))
    }
}

impl<C: DuplexChannel, O: TransferObserver> TransferSession<C, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(
        channel: C,
        config: TransferConfig,
        keys: Arc<OpeningKeys>,
        observer: Arc<O>,
    ) -> Self {
        Self {
            channel: Some(channel),
            config,
            keys,
            observer,
            state: SessionState::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    /// Verify `bundle` locally, then transfer it. Runs at most once.
    #[instrument(skip_all, fields(bundle_len = bundle.len()))]
    pub fn run(&mut self, bundle: &[u8]) -> Result<TransferReport, SessionError> {
        if self.state.phase != Phase::Idle {
            return Err(SessionError::NotReusable);
        }

        match self.execute(bundle) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.abort(e.clone());
                Err(e)
            }
        }
    }

    fn execute(&mut self, bundle: &[u8]) -> Result<TransferReport, SessionError> {
        self.config.validate()?;

        // Nothing touches the channel until the bundle checks out.
        let bundle = ProtectedBundle::from_bytes(bundle.to_vec())?;
        let decoded = verify_and_decode(&bundle, &self.keys)?;
        if bundle.header().is_debug() && !self.config.allow_debug_version {
            warn!("Refusing debug bundle (version 0)");
            return Err(SessionError::ReservedVersion);
        }
        self.observer.on_event(&TransferEvent::BundleVerified {
            version: decoded.version,
            firmware_len: decoded.firmware.len(),
            message: decoded.message.clone(),
        });

        let config = &self.config;
        let observer = self.observer.as_ref();
        let state = &mut self.state;
        let channel = match self.channel.as_mut() {
            Some(c) if c.is_open() => c,
            _ => return Err(ChannelError::Closed.into()),
        };
        info!(
            channel = %channel.describe(),
            version = decoded.version,
            firmware_len = decoded.firmware.len(),
            "Starting transfer"
        );

        let payload_len = bundle.signed_region().len();
        state.bytes_remaining = payload_len;
        state.total_frames = chunk_count(payload_len, config.max_frame_payload);

        let mut observable = ObservableChannel {
            inner: channel,
            observer,
        };

        loop {
            let mut ctx = HandlerContext {
                channel: &mut observable,
                observer,
                state: &mut *state,
                config,
                bundle: &bundle,
                cancel: &self.cancel,
            };
            let result = handle_phase(&mut ctx)?;

            let (from, to) = state.advance()?;
            observer.on_event(&TransferEvent::PhaseChanged { from, to });
            if result == HandleResult::Complete {
                break;
            }
        }

        observer.on_event(&TransferEvent::Complete {
            frames_sent: state.frames_sent,
            bytes_sent: payload_len,
        });

        Ok(TransferReport {
            version: decoded.version,
            firmware_len: decoded.firmware.len(),
            message: decoded.message,
            frames_sent: state.frames_sent,
            bytes_sent: payload_len,
        })
    }

    /// Tell the device to boot the new firmware, then release the channel.
    ///
    /// Only valid after a completed transfer. The caller is responsible for
    /// any confirmation step.
    pub fn request_boot(&mut self) -> Result<(), SessionError> {
        let phase = self.state.phase;
        if phase != Phase::Completed {
            return Err(SessionError::BootUnavailable { phase });
        }
        let channel = match self.channel.as_mut() {
            Some(c) if c.is_open() => c,
            _ => return Err(SessionError::BootUnavailable { phase }),
        };

        let result = channel.write_all(&[ControlToken::Boot.to_byte()]);
        self.close();
        result?;

        info!("Boot requested");
        self.observer.on_event(&TransferEvent::BootRequested);
        Ok(())
    }

    /// Release the channel. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            debug!(channel = %channel.describe(), "Channel closed");
        }
    }

    fn abort(&mut self, error: SessionError) {
        if let Some(from) = self.state.abort(error.clone()) {
            self.observer.on_event(&TransferEvent::PhaseChanged {
                from,
                to: Phase::Aborted,
            });
        }
        self.observer
            .on_event(&TransferEvent::Aborted { reason: error });
        self.close();
    }
}

impl<C: DuplexChannel, O: TransferObserver> Drop for TransferSession<C, O> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Channel wrapper that emits packet events.
struct ObservableChannel<'a, C: DuplexChannel, O: TransferObserver> {
    inner: &'a mut C,
    observer: &'a O,
}

impl<'a, C: DuplexChannel, O: TransferObserver> DuplexChannel for ObservableChannel<'a, C, O> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let res = self.inner.write_all(data);
        if res.is_ok() {
            let packet_type = if data.len() == 1 { "Token" } else { "Data" };
            self.observer.on_event(&TransferEvent::Packet {
                direction: PacketDirection::Tx,
                packet_type: packet_type.to_string(),
                length: data.len(),
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, ChannelError> {
        let res = self.inner.read_byte(timeout);
        if let Ok(byte) = &res {
            self.observer.on_event(&TransferEvent::Packet {
                direction: PacketDirection::Rx,
                packet_type: "Ack".to_string(),
                length: 1,
                data: Some(vec![*byte]),
            });
        }
        res
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{CipherKeys, SealingKeys, encode};
    use crate::events::NullObserver;
    use crate::protocol::{AES_KEY_SIZE, IV_SIZE};
    use crate::transport::MockChannel;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn sealing_keys() -> SealingKeys {
        SealingKeys::new(
            CipherKeys::new([0x5a; AES_KEY_SIZE], [0xa5; IV_SIZE]),
            SigningKey::random(&mut OsRng),
        )
    }

    fn fast_config() -> TransferConfig {
        TransferConfig {
            max_frame_payload: 64,
            ack_timeout_ms: 10,
            handshake_attempts: 3,
            handshake_poll_timeout_ms: 1,
            handshake_backoff_ms: 0,
            ..Default::default()
        }
    }

    fn session(
        mock: &MockChannel,
        keys: &SealingKeys,
    ) -> TransferSession<MockChannel, NullObserver> {
        TransferSession::with_observer(
            mock.clone(),
            fast_config(),
            Arc::new(keys.opening_keys()),
            Arc::new(NullObserver),
        )
    }

    #[test]
    fn test_wire_sequence() {
        let keys = sealing_keys();
        let bundle = encode(&[0x42; 100], 7, "release", &keys).unwrap();
        // 6 + 112 = 118 bytes of signed region -> 64 + 54
        let mock = MockChannel::new();
        mock.queue_reply(b"U");
        mock.queue_oks(2 + 2 + 1);

        let mut session = session(&mock, &keys);
        let report = session.run(bundle.as_bytes()).unwrap();

        assert_eq!(report.version, 7);
        assert_eq!(report.firmware_len, 100);
        assert_eq!(report.message, "release");
        assert_eq!(report.frames_sent, 2);
        assert_eq!(report.bytes_sent, 118);

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 6);
        assert_eq!(writes[0], b"U");
        assert_eq!(writes[1][0], b'M');
        assert_eq!(&writes[1][1..7], bundle.header_bytes());
        assert_eq!(&writes[1][7..], bundle.signature());
        assert_eq!(writes[2], b"C");
        assert_eq!(&writes[3][..2], &[0x00u8, 64]);
        assert_eq!(&writes[3][2..], &bundle.signed_region()[..64]);
        assert_eq!(&writes[4][..2], &[0x00u8, 54]);
        assert_eq!(&writes[4][2..], &bundle.signed_region()[64..]);
        assert_eq!(writes[5], vec![b'D', 0x00, 0x00]);

        let state = session.state();
        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.bytes_remaining, 0);
        assert_eq!(state.last_ack, Some(b'O'));
        assert!(session.is_channel_open());
    }

    #[test]
    fn test_metadata_rejection_is_protocol_violation() {
        let keys = sealing_keys();
        let bundle = encode(b"fw", 1, "", &keys).unwrap();
        let mock = MockChannel::new();
        mock.queue_reply(b"UE");

        let mut session = session(&mock, &keys);
        let err = session.run(bundle.as_bytes()).unwrap_err();

        assert_eq!(
            err,
            SessionError::ProtocolViolation {
                phase: Phase::MetadataExchange,
                expected: ControlToken::Ok,
                received: b'E',
            }
        );
        assert_eq!(session.state().phase, Phase::Aborted);
        assert_eq!(session.state().error, Some(err));
        assert!(!mock.is_open());
        assert_eq!(mock.get_writes().len(), 2);
    }

    #[test]
    fn test_missing_final_ack_times_out() {
        let keys = sealing_keys();
        let bundle = encode(b"fw", 1, "", &keys).unwrap();
        let mock = MockChannel::new();
        mock.queue_reply(b"U");
        mock.queue_oks(3);

        let mut session = session(&mock, &keys);
        let err = session.run(bundle.as_bytes()).unwrap_err();

        assert_eq!(
            err,
            SessionError::Timeout {
                phase: Phase::AwaitingCompletionAck,
                timeout_ms: 10,
            }
        );
        assert_eq!(mock.get_writes().last().unwrap(), &vec![b'D', 0x00, 0x00]);
    }

    #[test]
    fn test_invalid_config_fails_before_writing() {
        let keys = sealing_keys();
        let bundle = encode(b"fw", 1, "", &keys).unwrap();
        let mock = MockChannel::new();

        let mut session = TransferSession::with_observer(
            mock.clone(),
            TransferConfig {
                max_frame_payload: 0,
                ..fast_config()
            },
            Arc::new(keys.opening_keys()),
            Arc::new(NullObserver),
        );
        let err = session.run(bundle.as_bytes()).unwrap_err();

        assert!(matches!(err, SessionError::Config(_)));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let keys = sealing_keys();
        let mock = MockChannel::new();
        let mut session = session(&mock, &keys);

        session.close();
        session.close();
        assert!(!mock.is_open());
        assert!(!session.is_channel_open());
    }

    #[test]
    fn test_drop_closes_channel() {
        let keys = sealing_keys();
        let mock = MockChannel::new();
        drop(session(&mock, &keys));
        assert!(!mock.is_open());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
