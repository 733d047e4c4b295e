//! Stream defragmentation.
//!
//! A byte-stream transport delivers messages in arbitrary pieces. The
//! [`MessageBuffer`] accumulates incoming bytes and splits out every
//! complete message as soon as its header and declared body are present.
//! Yielded bodies are zero-copy views into the receive buffer.

use crate::error::ProtocolError;
use crate::header::{NowHeader, HEADER_SIZE};
use crate::message::RawMessage;
use bytes::BytesMut;
use std::collections::VecDeque;

/// Initial and steady-state buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Hard upper bound on buffer capacity.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Accumulates stream data and yields complete messages.
#[derive(Debug)]
pub struct MessageBuffer {
    buffer: BytesMut,
    /// Logical capacity; grows by doubling, returns to `default_size` once
    /// the unconsumed tail fits.
    capacity: usize,
    default_size: usize,
    max_size: usize,
    messages: VecDeque<RawMessage>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_sizes(DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE)
    }

    /// Creates a buffer with custom sizes. `max_size` is raised to
    /// `default_size` if smaller.
    pub fn with_sizes(default_size: usize, max_size: usize) -> Self {
        let default_size = default_size.max(HEADER_SIZE);
        Self {
            buffer: BytesMut::with_capacity(default_size),
            capacity: default_size,
            default_size,
            max_size: max_size.max(default_size),
            messages: VecDeque::new(),
        }
    }

    /// Appends received bytes and extracts every message they complete.
    ///
    /// Fails with [`ProtocolError::BufferOverflow`] when holding the data
    /// would exceed the maximum size. Nothing is appended in that case.
    pub fn add_data(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let required = self.buffer.len() + data.len();
        if required > self.capacity {
            self.grow(required)?;
        }

        self.buffer.extend_from_slice(data);
        self.split_messages()
    }

    fn grow(&mut self, required: usize) -> Result<(), ProtocolError> {
        if required > self.max_size {
            return Err(ProtocolError::BufferOverflow {
                required,
                max: self.max_size,
            });
        }

        let capacity = (self.capacity * 2).max(required).min(self.max_size);
        self.buffer.reserve(capacity - self.buffer.len());
        self.capacity = capacity;
        Ok(())
    }

    fn split_messages(&mut self) -> Result<(), ProtocolError> {
        let mut consumed = false;

        while let Some(header) = NowHeader::peek(&self.buffer) {
            let frame_size = header.frame_size();
            if frame_size > self.max_size {
                // can never complete within the bound
                return Err(ProtocolError::BufferOverflow {
                    required: frame_size,
                    max: self.max_size,
                });
            }
            if self.buffer.len() < frame_size {
                break;
            }

            let frame = self.buffer.split_to(frame_size).freeze();
            self.messages.push_back(RawMessage {
                header,
                body: frame.slice(HEADER_SIZE..),
            });
            consumed = true;
        }

        if consumed {
            self.compact();
        }
        Ok(())
    }

    /// Moves the unconsumed tail into a fresh allocation.
    ///
    /// Yielded messages keep the old allocation alive, so the tail is
    /// always copied. The capacity shrinks back to the default when the
    /// tail fits.
    fn compact(&mut self) {
        let tail = self.buffer.len();
        if tail <= self.default_size {
            self.capacity = self.default_size;
        }

        let mut fresh = BytesMut::with_capacity(self.capacity);
        fresh.extend_from_slice(&self.buffer);
        self.buffer = fresh;
    }

    pub fn has_complete_message(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn take_next_message(&mut self) -> Option<RawMessage> {
        self.messages.pop_front()
    }

    /// Number of complete messages waiting to be taken.
    pub fn queued(&self) -> usize {
        self.messages.len()
    }

    /// Number of bytes held that do not yet form a complete message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops buffered bytes and queued messages.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.buffer = BytesMut::with_capacity(self.default_size);
        self.capacity = self.default_size;
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
