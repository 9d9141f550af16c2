//! Utility functions and helpers
//!
//! Atomic file replacement and timestamp helpers.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, atomic_write_with, cleanup_temp_files};
pub use time::{unix_millis, unix_timestamp};
