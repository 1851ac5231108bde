//! Configuration management for the PBX exchange
//!
//! This crate provides configuration loading and parsing:
//! - TOML configuration file parsing
//! - Server configuration structure and defaults

pub mod server_config;
pub mod toml_config;

pub use server_config::*;
pub use toml_config::*;
