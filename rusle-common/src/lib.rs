//! # RUSLE Common Library
//!
//! Shared code for the RUSLE soil-loss services:
//! - Error type
//! - Configuration loading (TOML, environment, defaults)
//! - Event types and EventBus
//! - SSE helpers
//! - Time utilities

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
