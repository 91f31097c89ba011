//! Protocol implementations.

pub mod encoding;
pub mod stm32;

// Re-export common types
pub use stm32::{ACK, Command, CommandSet, NACK, Session, Unversioned, Versioned, VersionInfo};
