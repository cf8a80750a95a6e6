//! Wallet management
//!
//! Key pairs, address derivation and validation, and the file-backed
//! wallet collection used by the CLI.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
