//! Mock duplex channel for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{ChannelError, DuplexChannel};
use crate::protocol::ControlToken;

/// Mock channel for unit testing state machine logic.
///
/// Clones share state, so a test can keep a handle after moving the channel
/// into a session.
#[derive(Clone)]
pub struct MockChannel {
    /// Queued device bytes to return on read.
    reply_queue: Arc<Mutex<VecDeque<u8>>>,
    /// Captured writes, one entry per `write_all` call.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Whether the host side closed the channel.
    open: Arc<Mutex<bool>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            reply_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            open: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue raw device bytes to be returned on subsequent reads.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.reply_queue.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Queue a control token.
    pub fn queue_token(&self, token: ControlToken) {
        self.queue_reply(&[token.to_byte()]);
    }

    /// Queue `count` OK tokens.
    pub fn queue_oks(&self, count: usize) {
        for _ in 0..count {
            self.queue_token(ControlToken::Ok);
        }
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Bytes queued but not yet read.
    pub fn pending_replies(&self) -> usize {
        self.reply_queue.lock().unwrap().len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    fn check_usable(&self) -> Result<(), ChannelError> {
        if !*self.open.lock().unwrap() {
            return Err(ChannelError::Closed);
        }
        if !*self.connected.lock().unwrap() {
            return Err(ChannelError::Disconnected);
        }
        Ok(())
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplexChannel for MockChannel {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        self.check_usable()?;
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, ChannelError> {
        self.check_usable()?;
        self.reply_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ChannelError::timeout(timeout))
    }

    fn close(&mut self) {
        *self.open.lock().unwrap() = false;
    }

    fn is_open(&self) -> bool {
        *self.open.lock().unwrap()
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
