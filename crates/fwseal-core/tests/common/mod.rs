//! Common test utilities: key material and an emulated bootloader.

// Shared across several test files; not every item is used in each one.
#![allow(dead_code, unused_imports)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use fwseal_core::bundle::{CipherKeys, OpeningKeys, ProtectedBundle, SealingKeys};
pub use fwseal_core::protocol::{AES_KEY_SIZE, HEADER_SIZE, IV_SIZE, SIGNATURE_SIZE};
pub use fwseal_core::transport::{ChannelError, DuplexChannel};
pub use fwseal_core::{
    BundleHeader, ControlToken, Phase, SessionError, TransferConfig, TransferFrame,
    verify_and_decode,
};
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;

pub fn test_keys() -> SealingKeys {
    SealingKeys::new(
        CipherKeys::new([0x3c; AES_KEY_SIZE], [0xc3; IV_SIZE]),
        SigningKey::random(&mut OsRng),
    )
}

/// Small frames and short timeouts so failure paths finish quickly.
pub fn fast_config(max_frame_payload: usize) -> TransferConfig {
    TransferConfig {
        max_frame_payload,
        ack_timeout_ms: 50,
        handshake_attempts: 5,
        handshake_poll_timeout_ms: 1,
        handshake_backoff_ms: 1,
        handshake_backoff_max_ms: 5,
        ..Default::default()
    }
}

/// Deterministic firmware image.
pub fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStage {
    Listening,
    Ready,
    MetadataReceived,
    Receiving,
    Rejected,
    Installed,
    Failed,
    Booted,
}

/// Bootloader protocol logic, one host message at a time.
///
/// Mirrors what the device does: echo the handshake, keep the header and
/// signature, collect frames, then verify and decrypt once the terminator
/// arrives.
pub struct Bootloader {
    keys: OpeningKeys,
    pub stage: DeviceStage,
    pub header: Option<BundleHeader>,
    signature: Vec<u8>,
    pub received: Vec<u8>,
    pub frames_received: usize,
    /// 1-based frame number to answer with ERROR.
    pub reject_frame: Option<usize>,
    /// Writes that arrived after a rejection.
    pub writes_after_reject: usize,
    pub installed: Option<Vec<u8>>,
    pub message: Option<String>,
}

impl Bootloader {
    pub fn new(keys: OpeningKeys) -> Self {
        Self {
            keys,
            stage: DeviceStage::Listening,
            header: None,
            signature: Vec::new(),
            received: Vec::new(),
            frames_received: 0,
            reject_frame: None,
            writes_after_reject: 0,
            installed: None,
            message: None,
        }
    }

    /// Handle one complete host message, returning the reply byte.
    pub fn on_message(&mut self, msg: &[u8]) -> Option<u8> {
        let ok = Some(ControlToken::Ok.to_byte());
        let error = Some(ControlToken::Error.to_byte());

        match self.stage {
            DeviceStage::Listening if msg == [ControlToken::Update.to_byte()] => {
                self.stage = DeviceStage::Ready;
                Some(ControlToken::Update.to_byte())
            }
            DeviceStage::Ready if msg.first() == Some(&ControlToken::Metadata.to_byte()) => {
                let body = &msg[1..];
                if body.len() != HEADER_SIZE + SIGNATURE_SIZE {
                    return error;
                }
                match BundleHeader::from_bytes(&body[..HEADER_SIZE]) {
                    Ok(header) => self.header = Some(header),
                    Err(_) => return error,
                }
                self.signature = body[HEADER_SIZE..].to_vec();
                self.stage = DeviceStage::MetadataReceived;
                ok
            }
            DeviceStage::MetadataReceived if msg == [ControlToken::Chunk.to_byte()] => {
                self.stage = DeviceStage::Receiving;
                ok
            }
            DeviceStage::Receiving if msg == [ControlToken::Done.to_byte(), 0x00, 0x00] => {
                self.finish()
            }
            DeviceStage::Receiving => {
                let frame = match TransferFrame::decode(msg) {
                    Ok(frame) if !frame.is_terminator() => frame,
                    _ => return error,
                };
                self.frames_received += 1;
                if self.reject_frame == Some(self.frames_received) {
                    self.stage = DeviceStage::Rejected;
                    return error;
                }
                self.received.extend_from_slice(frame.payload());
                ok
            }
            DeviceStage::Rejected => {
                self.writes_after_reject += 1;
                None
            }
            DeviceStage::Installed if msg == [ControlToken::Boot.to_byte()] => {
                self.stage = DeviceStage::Booted;
                None
            }
            _ => error,
        }
    }

    fn finish(&mut self) -> Option<u8> {
        let mut data = self.signature.clone();
        data.extend_from_slice(&self.received);

        let decoded = ProtectedBundle::from_bytes(data)
            .ok()
            .filter(|bundle| Some(bundle.header()) == self.header)
            .and_then(|bundle| verify_and_decode(&bundle, &self.keys).ok());

        match decoded {
            Some(decoded) => {
                self.installed = Some(decoded.firmware);
                self.message = Some(decoded.message);
                self.stage = DeviceStage::Installed;
                Some(ControlToken::Ok.to_byte())
            }
            None => {
                self.stage = DeviceStage::Failed;
                Some(ControlToken::Error.to_byte())
            }
        }
    }
}

struct DeviceInner {
    bootloader: Bootloader,
    outbox: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    /// Handshake polls to leave unanswered before echoing.
    silent_polls: usize,
    /// Never answer the handshake.
    mute: bool,
    /// Drop the link once this many frames have arrived.
    disconnect_after: Option<usize>,
    disconnected: bool,
    closed: bool,
}

/// In-process channel backed by a [`Bootloader`].
///
/// Clones share state, so a test keeps a handle after the session takes
/// ownership of its copy.
#[derive(Clone)]
pub struct EmulatedDevice {
    inner: Arc<Mutex<DeviceInner>>,
}

impl EmulatedDevice {
    pub fn new(keys: OpeningKeys) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeviceInner {
                bootloader: Bootloader::new(keys),
                outbox: VecDeque::new(),
                writes: Vec::new(),
                silent_polls: 0,
                mute: false,
                disconnect_after: None,
                disconnected: false,
                closed: false,
            })),
        }
    }

    pub fn reject_frame(self, index: usize) -> Self {
        self.inner.lock().unwrap().bootloader.reject_frame = Some(index);
        self
    }

    pub fn silent_polls(self, polls: usize) -> Self {
        self.inner.lock().unwrap().silent_polls = polls;
        self
    }

    pub fn mute(self) -> Self {
        self.inner.lock().unwrap().mute = true;
        self
    }

    pub fn disconnect_after(self, frames: usize) -> Self {
        self.inner.lock().unwrap().disconnect_after = Some(frames);
        self
    }

    pub fn with_bootloader<R>(&self, f: impl FnOnce(&Bootloader) -> R) -> R {
        f(&self.inner.lock().unwrap().bootloader)
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn stage(&self) -> DeviceStage {
        self.with_bootloader(|b| b.stage)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl DuplexChannel for EmulatedDevice {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(ChannelError::Closed);
        }
        if inner.disconnected {
            return Err(ChannelError::Disconnected);
        }
        inner.writes.push(data.to_vec());

        if inner.mute && data == [ControlToken::Update.to_byte()] {
            return Ok(());
        }
        if let Some(reply) = inner.bootloader.on_message(data) {
            inner.outbox.push_back(reply);
        }
        if inner.disconnect_after == Some(inner.bootloader.frames_received) {
            inner.disconnected = true;
            inner.outbox.clear();
        }
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(ChannelError::Closed);
        }
        if inner.disconnected {
            return Err(ChannelError::Disconnected);
        }
        if inner.bootloader.stage == DeviceStage::Ready && inner.silent_polls > 0 {
            inner.silent_polls -= 1;
            return Err(ChannelError::timeout(timeout));
        }
        inner
            .outbox
            .pop_front()
            .ok_or(ChannelError::timeout(timeout))
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().closed = true;
    }

    fn is_open(&self) -> bool {
        !self.inner.lock().unwrap().closed
    }

    fn describe(&self) -> String {
        "emulated-bootloader".to_string()
    }
}

/// Run a [`Bootloader`] on the device end of a byte stream.
///
/// The stream carries no message boundaries, so the device reassembles
/// messages from what it already knows: token lengths, the header it was sent
/// and the frame size.
pub fn serve_stream<C: DuplexChannel>(
    channel: &mut C,
    bootloader: &mut Bootloader,
    max_frame_payload: usize,
) -> Result<(), ChannelError> {
    fn reply<C: DuplexChannel>(
        channel: &mut C,
        bootloader: &mut Bootloader,
        msg: &[u8],
    ) -> Result<(), ChannelError> {
        match bootloader.on_message(msg) {
            Some(byte) => channel.write_all(&[byte]),
            None => Ok(()),
        }
    }

    let wait = Duration::from_secs(5);

    let token = channel.read_byte(wait)?;
    reply(channel, bootloader, &[token])?;

    let mut metadata = vec![0u8; 1 + HEADER_SIZE + SIGNATURE_SIZE];
    channel.read_exact(&mut metadata, wait)?;
    reply(channel, bootloader, &metadata)?;

    let token = channel.read_byte(wait)?;
    reply(channel, bootloader, &[token])?;

    let header = bootloader.header.ok_or(ChannelError::Closed)?;
    let payload_len = HEADER_SIZE + fwseal_core::protocol::padded_len(header.plaintext_len());
    let frames = fwseal_core::frame::chunk_count(payload_len, max_frame_payload);
    for _ in 0..frames {
        let frame = TransferFrame::read_from(channel, max_frame_payload, wait)
            .map_err(|e| ChannelError::ReadFailed(e.to_string()))?;
        reply(channel, bootloader, &frame.encode())?;
    }

    let mut closing = [0u8; 3];
    channel.read_exact(&mut closing, wait)?;
    reply(channel, bootloader, &closing)?;

    let token = channel.read_byte(wait)?;
    reply(channel, bootloader, &[token])
}
