//! Chain-state storage
//!
//! The chain store is authoritative; the transaction indices, unspent
//! cache, and pool are derived or auxiliary state sharing the same
//! embedded database. The `db` module owns the process-wide single
//! writer lock.

pub mod chain_store;
pub mod db;
pub mod index;
pub mod pool;
pub mod tx_manager;
pub mod utxo_set;

pub use chain_store::{BlockAddState, ChainStore, ChainStoreIterator};
pub use index::{IndexManager, SpentOutputRecord};
pub use pool::{PendingOutput, TransactionPool};
pub use tx_manager::{AddressBalance, TransactionsManager};
pub use utxo_set::{UnspentOutput, UtxoSet};
