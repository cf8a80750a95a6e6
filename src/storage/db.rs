// The chain state is single-writer. Every logical operation against the
// database (block application, balance query, pool admission, reorg)
// runs with this process-wide lock held, so readers observe either the
// state before an operation or after it, never the middle. The proof-of
// work nonce search is the one long computation that must not hold it.

use crate::error::{ChainError, Result};
use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

static LOCAL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Acquire the chain-state lock. Held until the guard drops.
pub fn lock_chain_state() -> MutexGuard<'static, ()> {
    LOCAL_LOCK
        .lock()
        .expect("Failed to acquire chain-state lock - this should never happen")
}

/// Open the embedded database at `path`.
pub fn open_database(path: &Path) -> Result<sled::Db> {
    sled::open(path)
        .map_err(|e| ChainError::Storage(format!("Failed to open database at {path:?}: {e}")))
}
