//! Splitting a transfer payload into frame-sized chunks.

use super::codec::{FrameError, TransferFrame, validate_max_payload};

/// Number of data frames needed for `len` bytes (the terminator excluded).
pub fn chunk_count(len: usize, max_payload: usize) -> usize {
    if max_payload == 0 {
        return 0;
    }
    len.div_ceil(max_payload)
}

/// Iterator over in-order data frames with a short final chunk.
#[derive(Debug)]
pub struct FrameChunker<'a> {
    data: &'a [u8],
    max_payload: usize,
    offset: usize,
    current: usize,
    total: usize,
}

impl<'a> FrameChunker<'a> {
    pub fn new(data: &'a [u8], max_payload: usize) -> Result<Self, FrameError> {
        validate_max_payload(max_payload)?;
        Ok(Self {
            data,
            max_payload,
            offset: 0,
            current: 0,
            total: chunk_count(data.len(), max_payload),
        })
    }

    /// Total number of data frames.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Frames handed out so far.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Bytes not yet handed out.
    pub fn remaining_bytes(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.data.len()
    }
}

impl Iterator for FrameChunker<'_> {
    type Item = TransferFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_done() {
            return None;
        }
        let chunk_len = self.remaining_bytes().min(self.max_payload);
        let chunk = &self.data[self.offset..self.offset + chunk_len];
        self.offset += chunk_len;
        self.current += 1;
        // Chunk length never exceeds the validated limit.
        TransferFrame::new(chunk, self.max_payload).ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.current;
        (left, Some(left))
    }
}

impl ExactSizeIterator for FrameChunker<'_> {}
