//! HTTP request/response model and request-path helpers
//!
//! Engine-agnostic types shared by the HTTP/1.1 and HTTP/2 engines plus the
//! helpers the pipeline uses on every request: header stamping, body
//! parsing, percent decoding, compression policy, and traversal-safe path
//! resolution.

pub mod body;
pub mod compression;
pub mod escape;
pub mod headers;
pub mod path;
pub mod request;
pub mod response;

pub use request::{HttpVersion, Request};
pub use response::{FileSlice, Response, ResponseBody};
