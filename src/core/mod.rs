//! Core blockchain functionality
//!
//! Blocks, transactions, the proof-of-work search, and the minter that
//! turns pool transactions into finished blocks.

pub mod block;
pub mod minter;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use minter::{BlockPrepareState, Minter, MAX_BLOCK_TRANSACTIONS};
pub use monetary::{PAYMENT_FOR_BLOCK_MADE, UNITS_PER_COIN};
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{TXInput, TXOutput, Transaction, COINBASE_VOUT};
