//! Protocol implementations.

pub mod command;
pub mod xmodem;

// Re-export common types
pub use command::Command;
