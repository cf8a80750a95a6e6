//! Utility functions and helpers
//!
//! Cryptographic primitives, encodings, and the canonical serialization
//! layer used by every persisted structure.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, checksum, current_timestamp, double_sha256, generate_key_pair,
    hash160, ripemd160_digest, sha256_digest, sign_data, verify_signature,
};

pub use serialization::{deserialize, serialize};
