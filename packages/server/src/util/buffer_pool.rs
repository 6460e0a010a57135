//! Reusable I/O buffer pool
//!
//! File streaming borrows fixed-size buffers from here instead of
//! allocating per request. The pool is a bounded thread-safe queue;
//! buffers are cleared on return and returns beyond the bound are
//! discarded rather than grown.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Default size of one pooled buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of buffers retained.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<VecDeque<Vec<u8>>>,
    buffer_size: usize,
    max_buffers: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY)
    }
}

impl BufferPool {
    #[must_use]
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            buffers: Mutex::new(VecDeque::with_capacity(max_buffers)),
            buffer_size,
            max_buffers,
        }
    }

    /// Takes a zeroed buffer of the pool's fixed size.
    pub fn acquire(&self) -> Vec<u8> {
        if let Ok(mut buffers) = self.buffers.lock()
            && let Some(buf) = buffers.pop_front()
        {
            return buf;
        }
        vec![0u8; self.buffer_size]
    }

    /// Returns a buffer. Wrong-size or overflow buffers are dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        buf.fill(0);
        if let Ok(mut buffers) = self.buffers.lock()
            && buffers.len() < self.max_buffers
        {
            buffers.push_back(buf);
        }
    }

    /// Buffers currently idle in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }
}
