//! Flow control windows
//!
//! Signed 32-bit credit balances, one pair per stream and one pair for
//! the connection. Receive-side checks happen before any state advances;
//! send-side consumption is clamped by the caller. WINDOW_UPDATE credits
//! are additive and guarded against pushing a window past 2^31-1.

use crate::error::{Result, ServerError};

use super::ErrorCode;

/// One credit balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    available: i32,
}

impl FlowWindow {
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self { available: initial as i32 }
    }

    #[must_use]
    pub fn available(&self) -> i32 {
        self.available
    }

    /// True when the window can absorb `len` bytes.
    #[must_use]
    pub fn can_consume(&self, len: u32) -> bool {
        i64::from(self.available) >= i64::from(len)
    }

    /// Consumes `len` bytes. Callers check `can_consume` first; the debug
    /// assertion documents the invariant.
    pub fn consume(&mut self, len: u32) {
        debug_assert!(self.can_consume(len));
        self.available -= len as i32;
    }

    /// Adds a WINDOW_UPDATE credit. An increment that would exceed
    /// 2^31-1 is a flow-control violation at the caller's scope.
    pub fn credit(&mut self, increment: u32, stream_id: u32) -> Result<()> {
        let next = i64::from(self.available) + i64::from(increment);
        if next > i64::from(i32::MAX) {
            return Err(if stream_id == 0 {
                ServerError::h2_connection(ErrorCode::FlowControl, "connection window overflow")
            } else {
                ServerError::h2_stream(stream_id, ErrorCode::FlowControl, "stream window overflow")
            });
        }
        self.available = next as i32;
        Ok(())
    }

    /// Applies a SETTINGS_INITIAL_WINDOW_SIZE delta. Windows may go
    /// negative here; sending resumes once credits bring them positive.
    pub fn adjust(&mut self, delta: i64) -> Result<()> {
        let next = i64::from(self.available) + delta;
        if next > i64::from(i32::MAX) {
            return Err(ServerError::h2_connection(
                ErrorCode::FlowControl,
                "window adjustment overflow",
            ));
        }
        self.available = next as i32;
        Ok(())
    }
}
