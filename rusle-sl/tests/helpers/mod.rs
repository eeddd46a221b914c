//! Test Helper Utilities
//!
//! Shared utilities for testing rusle-sl

#![allow(dead_code)]

pub mod fixtures;
pub mod scripted_compute;

// Re-export commonly used items
pub use fixtures::{
    manager_with, resolve_square, square_polygon, test_app, test_config, test_state,
    wait_for_terminal,
};
pub use scripted_compute::{ComputeMode, ScriptedCompute};
