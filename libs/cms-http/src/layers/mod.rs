//! Tower layers wrapped around the transport service
//!
//! - [`RetryLayer`] - Resends rate-limited (429) requests with exponential backoff and jitter

mod retry;

pub use retry::{RETRY_ATTEMPT_HEADER, RetryLayer, RetryService, backoff_delay, next_delay};
