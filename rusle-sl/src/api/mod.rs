//! HTTP API handlers for rusle-sl
//!
//! REST endpoints for uploads, jobs and exports, plus an SSE event stream.

pub mod export;
pub mod health;
pub mod process;
pub mod sse;
pub mod upload;
pub mod visualize;

pub use export::export_routes;
pub use health::{health_routes, spawn_error_tracker};
pub use process::process_routes;
pub use sse::event_stream;
pub use upload::upload_routes;
pub use visualize::visualize_routes;
