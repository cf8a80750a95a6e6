//! # Ferrocoin
//!
//! A small UTXO cryptocurrency node core: a proof-of-work blockchain
//! with fork-aware insertion, derived balance indices, and a persistent
//! pool of pending transactions.
//!
//! ## How the code is organized
//! - `core/`: blocks, transactions, the nonce search, and the minter
//! - `storage/`: the chain store with branch tracking, the transaction
//!   indices, the unspent-output cache, and the pool, all sharing one
//!   embedded database
//! - `node/`: the manager tying storage and consensus together; the
//!   block-add state machine and the reorganization driver live here
//! - `wallet/`: key pairs, addresses, and the local wallet file
//! - `utils/`: hashing, signatures, encodings, canonical serialization
//! - `config/`, `error/`, `cli/`: the usual supporting cast
//!
//! The chain state is single-writer: every operation in `node/` holds a
//! process-wide lock while it reads and writes, and the proof-of-work
//! search runs between two lock scopes so minting never starves inbound
//! blocks.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod node;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use crate::cli::{Command, Opt};
pub use crate::config::{Config, GLOBAL_CONFIG};
pub use crate::core::{
    Block, BlockPrepareState, Minter, ProofOfWork, TXInput, TXOutput, Transaction,
    MAX_BLOCK_TRANSACTIONS, PAYMENT_FOR_BLOCK_MADE, TARGET_BITS, UNITS_PER_COIN,
};
pub use crate::error::{ChainError, Result};
pub use crate::node::{HistoryRecord, NodeManager, NodeState};
pub use crate::storage::{
    AddressBalance, BlockAddState, ChainStore, IndexManager, PendingOutput, SpentOutputRecord,
    TransactionPool, TransactionsManager, UnspentOutput, UtxoSet,
};
pub use crate::wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
