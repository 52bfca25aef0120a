//! tinydht-core: wire format, protocol commands, and configuration.
//! All other tinydht crates depend on this one.

pub mod command;
pub mod config;
pub mod wire;

pub use command::{Command, Message};
pub use wire::{content_hash, Key, Value, WireError};
