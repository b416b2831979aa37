//! Reliability patterns for the activity source
//!
//! This module provides:
//! - [`RateLimiter`] - Slot-reserving pacing of outbound calls
//! - [`RetryPolicy`] - Fixed-delay retry configuration
//! - [`RetryableClient`] - Rate-limited calls with quota retries and a gave-up outcome

mod rate_limiter;
mod retry;

pub use rate_limiter::RateLimiter;
pub use retry::{CallOutcome, Classify, ErrorClass, RetryPolicy, RetryableClient};
