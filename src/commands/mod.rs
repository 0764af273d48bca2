//! CLI command implementations
//!
//! Every command receives an open connection to an adapter in `Ready`
//! state. Commands that need a particular operating mode switch to it first.

pub mod gpio;
pub mod i2c_scan;
pub mod info;
pub mod spi;
pub mod watch;

/// Result type of a CLI command
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;
