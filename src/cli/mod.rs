//! Command-line interface
//!
//! Argument parsing for the node binary. Each command is a thin wrapper
//! over one `NodeManager` method.

pub mod commands;

pub use commands::{Command, Opt};
