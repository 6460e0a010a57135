//! Metrics collection and exposition
//!
//! A process-wide collector owned by the server and passed explicitly into
//! every component that records, keeping tests hermetic. All hot-path
//! operations are atomic; histogram memory stays bounded no matter how many
//! observations arrive.

pub mod metrics;
pub mod prometheus;

pub use metrics::{Histogram, HistogramSnapshot, MetricsCollector};
pub use prometheus::render;
