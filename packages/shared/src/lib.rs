//! Shared utilities for the Sajiki workspace.
//!
//! - `logger`: tracing subscriber setup
//! - `time`: clock abstraction and timestamp formatting
//! - `settings`: key-value settings store capability

pub mod logger;
pub mod settings;
pub mod time;
