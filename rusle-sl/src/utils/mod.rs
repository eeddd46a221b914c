//! Utility modules for rusle-sl

pub mod retry;

pub use retry::{retry_transient, RetryPolicy};
