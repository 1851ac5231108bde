//! Wire protocol of the PBX exchange
//!
//! Client lines are ASCII, CRLF-terminated, with case-sensitive keywords;
//! server lines are ASCII, LF-terminated. This crate owns both grammars so
//! the switch core never handles raw protocol text.

pub mod command;
pub mod notify;

pub use command::Command;
pub use notify::Notification;
