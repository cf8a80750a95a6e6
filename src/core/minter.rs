// Block production and block verification. Preparation reads the pool
// and chain under the caller's lock; the nonce search in complete_block
// is pure and runs lock-free.

use crate::core::{Block, ProofOfWork, Transaction};
use crate::error::{ChainError, Result};
use crate::storage::{ChainStore, TransactionsManager};
use log::info;
use std::collections::HashSet;

/// Upper bound of pool transactions drained into one block
pub const MAX_BLOCK_TRANSACTIONS: usize = 1000;

/// Outcome of block preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPrepareState {
    /// A candidate block is staged and ready for the nonce search
    Done,
    /// Nothing usable in the pool after verification and conflict checks
    NoTransactions,
}

pub struct Minter {
    minter_address: String,
    chain: ChainStore,
    prepared: Option<Block>,
}

impl Minter {
    pub fn new(minter_address: &str, chain: ChainStore) -> Minter {
        Minter {
            minter_address: minter_address.to_string(),
            chain,
            prepared: None,
        }
    }

    /// Stage a candidate block from the pool: up to MAX_BLOCK_TRANSACTIONS
    /// entries in timestamp order, individually verified, conflicts
    /// resolved in favor of the earlier entry, and a fresh coinbase
    /// prepended.
    pub fn prepare_new_block(&mut self) -> Result<BlockPrepareState> {
        let txman = TransactionsManager::new(self.chain.clone());
        let txs = txman.get_transactions_for_new_block(MAX_BLOCK_TRANSACTIONS)?;

        if txs.is_empty() {
            return Ok(BlockPrepareState::NoTransactions);
        }

        let coinbase = Transaction::new_coinbase_tx(self.minter_address.as_str(), &[])?;
        let mut transactions = vec![coinbase];
        transactions.extend(txs);

        let top_hash = self.chain.get_top_hash();
        let height = self.chain.get_best_height()? + 1;

        info!(
            "Prepared block candidate at height {} with {} transactions",
            height,
            transactions.len()
        );

        self.prepared = Some(Block::new_candidate(top_hash, &transactions, height)?);
        Ok(BlockPrepareState::Done)
    }

    /// Run the nonce search over the staged candidate and return the
    /// finished block.
    pub fn complete_block(&mut self) -> Result<Block> {
        let mut block = self.prepared.take().ok_or_else(|| {
            ChainError::VerifyFailed("No block candidate has been prepared".to_string())
        })?;

        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let (nonce, hash) = pow.run();
        block.complete(nonce, hash);

        Ok(block)
    }

    /// Full block verification: structure, hash, then every transaction
    /// against the branch ending at the block's parent. Transactions may
    /// spend outputs of earlier transactions in the same block.
    pub fn verify_block(&self, block: &Block) -> Result<()> {
        let transactions = block.get_transactions();

        if transactions.is_empty() {
            return Err(ChainError::VerifyFailed(
                "Block has no transactions".to_string(),
            ));
        }
        if !transactions[0].is_coinbase() {
            return Err(ChainError::VerifyFailed(
                "First transaction must be a coinbase".to_string(),
            ));
        }
        // structural coinbase check, including the exact reward amount
        transactions[0].verify(&std::collections::HashMap::new())?;

        let mut seen_ids = HashSet::new();
        for (i, tx) in transactions.iter().enumerate() {
            if i > 0 && tx.is_coinbase() {
                return Err(ChainError::VerifyFailed(
                    "Only the first transaction may be a coinbase".to_string(),
                ));
            }
            if !seen_ids.insert(tx.get_id_bytes()) {
                return Err(ChainError::VerifyFailed(
                    "Duplicate transaction id in block".to_string(),
                ));
            }
        }

        if ProofOfWork::compute_hash(block) != block.get_hash() {
            return Err(ChainError::VerifyFailed(
                "Stored block hash does not match its contents".to_string(),
            ));
        }
        if !ProofOfWork::validate(block) {
            return Err(ChainError::VerifyFailed(
                "Block hash does not satisfy the difficulty target".to_string(),
            ));
        }

        if !block.is_genesis() {
            let prev = self
                .chain
                .get_block(block.get_pre_block_hash())?
                .ok_or_else(|| {
                    ChainError::NotFound("Previous block is not in the store".to_string())
                })?;
            if block.get_height() != prev.get_height() + 1 {
                return Err(ChainError::VerifyFailed(format!(
                    "Block height {} does not follow parent height {}",
                    block.get_height(),
                    prev.get_height()
                )));
            }

            let txman = TransactionsManager::new(self.chain.clone());
            for (i, tx) in transactions.iter().enumerate().skip(1) {
                txman.verify_transaction(tx, &transactions[..i], block.get_pre_block_hash())?;
            }
        }

        Ok(())
    }
}
