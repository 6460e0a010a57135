//! Authentication and rate limiting

pub mod auth;
pub mod rate_limit;

pub use auth::Authenticator;
pub use rate_limit::{RateDecision, RateLimiter};
