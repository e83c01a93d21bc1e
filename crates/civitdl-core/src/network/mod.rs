//! Network utilities: the shared HTTP client and retry policy.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{retry_async, RetryConfig, RetryStats};
