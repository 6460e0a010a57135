//! Small shared utilities

pub mod buffer_pool;

pub use buffer_pool::BufferPool;

/// Random 16-hex-digit request id for log correlation.
#[must_use]
pub fn request_id() -> String {
    format!("{:016x}", fastrand::u64(..))
}
