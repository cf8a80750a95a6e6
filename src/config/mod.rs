//! Configuration management
//!
//! Minimal runtime settings for the node: the data directory holding the
//! database and wallet file, and the minting address for block rewards.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
