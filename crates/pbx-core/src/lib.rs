//! Core types and utilities for the PBX exchange
//!
//! This crate provides the vocabulary shared across the exchange stack

/// Git version string, set at compile time
pub const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");
/// Crate version followed by git version string, e.g., "0.1.0-aabbccdd"
pub const STACK_VERSION: &str = const_format::formatcp!("{}-{}", env!("CARGO_PKG_VERSION"), GIT_VERSION);

pub mod debug;
pub mod state;

// Re-export commonly used items
pub use state::{Extension, TuState};
