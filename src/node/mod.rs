//! The node manager
//!
//! Top-level glue over the chain store, the derived caches, and the
//! minter. Every public operation takes the process-wide chain-state
//! lock, so callers on any thread observe whole operations. The one
//! long computation, the proof-of-work nonce search, runs between two
//! lock scopes.

use crate::core::{Block, BlockPrepareState, Minter, Transaction, MAX_BLOCK_TRANSACTIONS};
use crate::error::{ChainError, Result};
use crate::storage::{
    db, AddressBalance, BlockAddState, ChainStore, TransactionsManager, UnspentOutput,
};
use crate::wallet::{convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet};
use data_encoding::HEXLOWER;
use log::info;
use std::path::Path;

/// A snapshot of the node for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    pub height: usize,
    pub blocks_total: usize,
    pub transactions_in_pool: usize,
    pub unspent_outputs: usize,
}

/// One movement of value touching an address, as reported by the
/// history query.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub income: bool,
    pub amount: i64,
    /// The other side of the transfer; empty for minted coins
    pub counterpart: String,
    pub txid: Vec<u8>,
}

pub struct NodeManager {
    chain: ChainStore,
    minter_address: String,
}

impl NodeManager {
    /// Create a fresh blockchain whose genesis coinbase pays `address`.
    /// The address also becomes this node's minter address.
    pub fn create_blockchain(db_path: &Path, address: &str, genesis_data: &str) -> Result<NodeManager> {
        if !validate_address(address) {
            return Err(ChainError::BadAddress(address.to_string()));
        }

        let _guard = db::lock_chain_state();

        let coinbase = Transaction::new_coinbase_tx(address, genesis_data.as_bytes())?;
        let genesis = Block::generate_genesis_block(&coinbase)?;
        let chain = ChainStore::create(db_path, &genesis)?;

        let manager = NodeManager {
            chain,
            minter_address: address.to_string(),
        };
        manager.txman().block_added(&genesis, true)?;

        info!(
            "Created blockchain with genesis {}",
            HEXLOWER.encode(genesis.get_hash())
        );
        Ok(manager)
    }

    /// Open an existing blockchain.
    pub fn open(db_path: &Path, minter_address: &str) -> Result<NodeManager> {
        let chain = ChainStore::open(db_path)?;
        Ok(NodeManager {
            chain,
            minter_address: minter_address.to_string(),
        })
    }

    pub fn chain(&self) -> &ChainStore {
        &self.chain
    }

    fn txman(&self) -> TransactionsManager {
        TransactionsManager::new(self.chain.clone())
    }

    fn minter(&self) -> Minter {
        Minter::new(self.minter_address.as_str(), self.chain.clone())
    }

    /// Apply a block from any source. Verification runs first; the
    /// returned state tells the caller what happened, and `Exists` /
    /// `NoPrev` carry no side effects at all.
    pub fn add_block(&self, block: &Block) -> Result<BlockAddState> {
        let _guard = db::lock_chain_state();
        self.add_block_locked(block)
    }

    fn add_block_locked(&self, block: &Block) -> Result<BlockAddState> {
        if self.chain.block_exists(block.get_hash())? {
            return Ok(BlockAddState::Exists);
        }
        if !self.chain.block_exists(block.get_pre_block_hash())? {
            return Ok(BlockAddState::NoPrev);
        }

        self.minter().verify_block(block)?;

        let pre_top = self.chain.get_top_hash();
        let state = self.chain.add_block(block)?;
        let txman = self.txman();

        match state {
            BlockAddState::AddedToTop => {
                txman.block_added(block, true)?;
                info!(
                    "Block {} extends the primary branch at height {}",
                    HEXLOWER.encode(block.get_hash()),
                    block.get_height()
                );
            }
            BlockAddState::AddedToParallel => {
                // the indices learn about every branch, the unspent
                // cache and pool follow the primary branch only
                txman.block_added(block, false)?;
                info!(
                    "Block {} stored on a side branch",
                    HEXLOWER.encode(block.get_hash())
                );
            }
            BlockAddState::AddedToParallelTop => {
                txman.block_added(block, false)?;
                self.reorganize(block, pre_top.as_slice())?;
            }
            BlockAddState::Exists | BlockAddState::NoPrev => {}
        }

        Ok(state)
    }

    // A side branch became strictly taller. Cancel the old primary
    // blocks from the tip downward, then apply the new branch from the
    // common ancestor upward. The chain-list flags and top pointer flip
    // in one database transaction before the caches move.
    fn reorganize(&self, new_tip: &Block, pre_top: &[u8]) -> Result<()> {
        let (new_chain, old_chain) = self
            .chain
            .get_branches_replacement(new_tip.get_hash(), pre_top)?;

        info!(
            "Reorganizing: {} blocks leave the primary branch, {} join it",
            old_chain.len(),
            new_chain.len()
        );

        self.chain.replace_primary_branch(&old_chain, &new_chain)?;

        let txman = self.txman();
        for block in old_chain.iter().rev() {
            txman.block_removed_from_primary(block)?;
        }
        for block in new_chain.iter() {
            txman.block_added_to_primary(block)?;
        }
        Ok(())
    }

    /// Remove the primary tip. Its transactions go back to the pool and
    /// the unspent cache is rolled back.
    pub fn drop_block(&self) -> Result<Block> {
        let _guard = db::lock_chain_state();
        let block = self.chain.delete_block()?;
        self.txman().block_removed(&block)?;
        Ok(block)
    }

    /// Build, sign, verify, and pool a transfer from a local wallet.
    /// Returns the transaction id.
    pub fn send(&self, wallet: &Wallet, to: &str, amount: i64) -> Result<Vec<u8>> {
        if !validate_address(to) {
            return Err(ChainError::BadAddress(to.to_string()));
        }

        let _guard = db::lock_chain_state();
        let tx = self.txman().create_transaction(wallet, to, amount)?;
        info!("Pooled transaction {}", HEXLOWER.encode(tx.get_id()));
        Ok(tx.get_id_bytes())
    }

    /// Accept a complete transaction from a peer or RPC client.
    pub fn receive_transaction(&self, tx: &Transaction) -> Result<()> {
        let _guard = db::lock_chain_state();
        self.txman().received_new_transaction(tx)
    }

    /// Try to mint: prepare a candidate under the lock, release it for
    /// the nonce search, then reapply through the normal block path.
    /// Returns the new block hash, or None when the pool had nothing
    /// usable.
    pub fn try_to_make_block(&self) -> Result<Option<Vec<u8>>> {
        let mut minter = self.minter();
        {
            let _guard = db::lock_chain_state();
            if minter.prepare_new_block()? == BlockPrepareState::NoTransactions {
                return Ok(None);
            }
        }

        // the search holds no lock, inbound blocks keep flowing
        let block = minter.complete_block()?;

        match self.add_block(&block)? {
            BlockAddState::AddedToTop | BlockAddState::AddedToParallelTop => {
                Ok(Some(block.get_hash_bytes()))
            }
            state => {
                info!("Minted block was not applied: {state:?}");
                Ok(None)
            }
        }
    }

    pub fn get_node_state(&self) -> Result<NodeState> {
        let _guard = db::lock_chain_state();
        let txman = self.txman();
        Ok(NodeState {
            height: self.chain.get_best_height()?,
            blocks_total: self.chain.get_blocks_count()?,
            transactions_in_pool: txman.get_pool_count()?,
            unspent_outputs: txman.get_unspent_count()?,
        })
    }

    pub fn get_balance(&self, address: &str) -> Result<AddressBalance> {
        let _guard = db::lock_chain_state();
        self.txman().get_address_balance(address)
    }

    /// Rebuild the derived caches from the block store. Returns the
    /// number of unspent records.
    pub fn reindex_cache(&self) -> Result<usize> {
        let _guard = db::lock_chain_state();
        self.txman().reindex_data()
    }

    pub fn cancel_transaction(&self, txid: &[u8]) -> Result<()> {
        let _guard = db::lock_chain_state();
        self.txman().cancel_transaction(txid)
    }

    pub fn get_unapproved_transactions(&self) -> Result<Vec<Transaction>> {
        let _guard = db::lock_chain_state();
        self.txman().get_unapproved_transactions(MAX_BLOCK_TRANSACTIONS)
    }

    pub fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>> {
        let _guard = db::lock_chain_state();
        self.txman().get_unspent_outputs(address)
    }

    /// Every transfer on the primary branch that touched an address,
    /// oldest first.
    pub fn get_address_history(&self, address: &str) -> Result<Vec<HistoryRecord>> {
        let target_hash = pub_key_hash_from_address(address)?;

        let _guard = db::lock_chain_state();
        let mut blocks: Vec<Block> = self.chain.iterator().collect();
        blocks.reverse();

        let mut history = vec![];
        for block in &blocks {
            for tx in block.get_transactions() {
                let sender_hash = if tx.is_coinbase() {
                    vec![]
                } else {
                    hash_pub_key(tx.get_vin()[0].get_pub_key())
                };
                let sent_by_target = sender_hash.as_slice() == target_hash.as_slice();

                for vout in tx.get_vout() {
                    if sent_by_target && !vout.is_locked_with_key(target_hash.as_slice()) {
                        history.push(HistoryRecord {
                            income: false,
                            amount: vout.get_value(),
                            counterpart: convert_address(vout.get_pub_key_hash()),
                            txid: tx.get_id_bytes(),
                        });
                    } else if !sent_by_target && vout.is_locked_with_key(target_hash.as_slice()) {
                        history.push(HistoryRecord {
                            income: true,
                            amount: vout.get_value(),
                            counterpart: if tx.is_coinbase() {
                                String::new()
                            } else {
                                convert_address(sender_hash.as_slice())
                            },
                            txid: tx.get_id_bytes(),
                        });
                    }
                }
            }
        }
        Ok(history)
    }
}
