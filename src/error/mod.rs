//! Error handling for the node
//!
//! One error enum covers every subsystem so that `?` works across the
//! storage, consensus, and pool layers without wrapper noise.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Error taxonomy of the chain-state engine
#[derive(Debug, Clone)]
pub enum ChainError {
    /// Underlying key-value store failure; fatal to the current operation
    Storage(String),
    /// Cryptographic operation errors (key handling, signing)
    Crypto(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Address failed checksum or structural validation
    BadAddress(String),
    /// Signature bytes could not be applied or parsed
    BadSignature(String),
    /// A transaction or block failed the verification rules
    VerifyFailed(String),
    /// Pool admission rejected: an existing entry spends the same output
    PoolConflict(String),
    /// Lookup miss, distinguishable from a storage failure
    NotFound(String),
    /// Wallet operation errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// Not enough spendable outputs for a requested transfer
    InsufficientFunds { required: i64, available: i64 },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Storage(msg) => write!(f, "Storage error: {msg}"),
            ChainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            ChainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ChainError::Io(msg) => write!(f, "I/O error: {msg}"),
            ChainError::BadAddress(addr) => write!(f, "Invalid address: {addr}"),
            ChainError::BadSignature(msg) => write!(f, "Bad signature: {msg}"),
            ChainError::VerifyFailed(msg) => write!(f, "Verification failed: {msg}"),
            ChainError::PoolConflict(msg) => write!(f, "Pool conflict: {msg}"),
            ChainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ChainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            ChainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            ChainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<sled::Error> for ChainError {
    fn from(err: sled::Error) -> Self {
        ChainError::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for ChainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for ChainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}
