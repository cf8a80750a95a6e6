// Derived transaction indices: where a transaction landed on the primary
// branch, and which of its outputs were consumed, per branch. Both are
// caches over the block store and can be rebuilt at any time.

use crate::core::{Block, Transaction};
use crate::error::{ChainError, Result};
use crate::storage::ChainStore;
use data_encoding::HEXLOWER;
use log::info;
use sled::Tree;
use std::collections::HashSet;

const TX_TO_BLOCK_TREE: &str = "txtoblock";
const TX_SPENT_TREE: &str = "txspent";

const HASH_LEN: usize = 32;
const SPENT_RECORD_LEN: usize = 4 + HASH_LEN + HASH_LEN;

/// One consumed output of a known transaction. The spending block hash
/// lets queries filter records down to a single branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentOutputRecord {
    pub out_index: i32,
    pub spending_txid: Vec<u8>,
    pub spending_block: Vec<u8>,
}

// records are stored packed back to back: index, spender txid, block hash
fn pack_records(records: &[SpentOutputRecord]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(records.len() * SPENT_RECORD_LEN);
    for record in records {
        bytes.extend(record.out_index.to_be_bytes());
        bytes.extend(record.spending_txid.as_slice());
        bytes.extend(record.spending_block.as_slice());
    }
    bytes
}

fn unpack_records(bytes: &[u8]) -> Result<Vec<SpentOutputRecord>> {
    if bytes.len() % SPENT_RECORD_LEN != 0 {
        return Err(ChainError::Serialization(
            "Malformed spent-output record list".to_string(),
        ));
    }
    let mut records = Vec::with_capacity(bytes.len() / SPENT_RECORD_LEN);
    for chunk in bytes.chunks(SPENT_RECORD_LEN) {
        let mut index_bytes = [0u8; 4];
        index_bytes.copy_from_slice(&chunk[..4]);
        records.push(SpentOutputRecord {
            out_index: i32::from_be_bytes(index_bytes),
            spending_txid: chunk[4..4 + HASH_LEN].to_vec(),
            spending_block: chunk[4 + HASH_LEN..].to_vec(),
        });
    }
    Ok(records)
}

pub struct IndexManager {
    chain: ChainStore,
}

impl IndexManager {
    pub fn new(chain: ChainStore) -> IndexManager {
        IndexManager { chain }
    }

    fn tx_to_block_tree(&self) -> Result<Tree> {
        self.chain
            .get_db()
            .open_tree(TX_TO_BLOCK_TREE)
            .map_err(|e| ChainError::Storage(format!("Failed to open tx-to-block tree: {e}")))
    }

    fn tx_spent_tree(&self) -> Result<Tree> {
        self.chain
            .get_db()
            .open_tree(TX_SPENT_TREE)
            .map_err(|e| ChainError::Storage(format!("Failed to open tx-spent tree: {e}")))
    }

    fn load_records(&self, txid: &[u8]) -> Result<Vec<SpentOutputRecord>> {
        let bytes = self
            .tx_spent_tree()?
            .get(txid)
            .map_err(|e| ChainError::Storage(format!("Failed to read spent records: {e}")))?;
        match bytes {
            Some(bytes) => unpack_records(bytes.as_ref()),
            None => Ok(vec![]),
        }
    }

    fn store_records(&self, txid: &[u8], records: &[SpentOutputRecord]) -> Result<()> {
        let tree = self.tx_spent_tree()?;
        if records.is_empty() {
            tree.remove(txid)
                .map_err(|e| ChainError::Storage(format!("Failed to remove spent records: {e}")))?;
        } else {
            tree.insert(txid, pack_records(records))
                .map_err(|e| ChainError::Storage(format!("Failed to store spent records: {e}")))?;
        }
        Ok(())
    }

    /// Record a block's effects: spent-output records for every input
    /// (all branches), and the tx-to-block mapping when the block joined
    /// the primary branch.
    pub fn block_added(&self, block: &Block, on_primary: bool) -> Result<()> {
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let mut records = self.load_records(vin.get_txid())?;
                    let record = SpentOutputRecord {
                        out_index: vin.get_vout(),
                        spending_txid: tx.get_id_bytes(),
                        spending_block: block.get_hash_bytes(),
                    };
                    if !records.contains(&record) {
                        records.push(record);
                        self.store_records(vin.get_txid(), &records)?;
                    }
                }
            }
            if on_primary {
                self.tx_to_block_tree()?
                    .insert(tx.get_id(), block.get_hash())
                    .map_err(|e| {
                        ChainError::Storage(format!("Failed to store tx-to-block entry: {e}"))
                    })?;
            }
        }
        Ok(())
    }

    /// Inverse of `block_added`, used when a block leaves the store.
    pub fn block_removed(&self, block: &Block) -> Result<()> {
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let records = self.load_records(vin.get_txid())?;
                    let remaining: Vec<SpentOutputRecord> = records
                        .into_iter()
                        .filter(|r| r.spending_block != block.get_hash())
                        .collect();
                    self.store_records(vin.get_txid(), &remaining)?;
                }
            }
            self.remove_tx_mapping(tx, block)?;
        }
        Ok(())
    }

    /// A stored block joined the primary branch during a reorg: only the
    /// tx-to-block mapping changes, the spent records already exist.
    pub fn promote_block(&self, block: &Block) -> Result<()> {
        let tree = self.tx_to_block_tree()?;
        for tx in block.get_transactions() {
            tree.insert(tx.get_id(), block.get_hash()).map_err(|e| {
                ChainError::Storage(format!("Failed to store tx-to-block entry: {e}"))
            })?;
        }
        Ok(())
    }

    /// A stored block left the primary branch during a reorg.
    pub fn demote_block(&self, block: &Block) -> Result<()> {
        for tx in block.get_transactions() {
            self.remove_tx_mapping(tx, block)?;
        }
        Ok(())
    }

    fn remove_tx_mapping(&self, tx: &Transaction, block: &Block) -> Result<()> {
        let tree = self.tx_to_block_tree()?;
        let mapped = tree
            .get(tx.get_id())
            .map_err(|e| ChainError::Storage(format!("Failed to read tx-to-block entry: {e}")))?;
        if let Some(mapped) = mapped {
            if mapped.as_ref() == block.get_hash() {
                tree.remove(tx.get_id()).map_err(|e| {
                    ChainError::Storage(format!("Failed to remove tx-to-block entry: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Locate a transaction on the branch that ends at `tip` (the primary
    /// tip when empty). The primary mapping answers most lookups; side
    /// branches fall back to walking blocks.
    pub fn get_transaction_all_info(
        &self,
        txid: &[u8],
        tip: &[u8],
    ) -> Result<Option<(Transaction, Vec<u8>, usize)>> {
        let tip = if tip.is_empty() {
            self.chain.get_top_hash()
        } else {
            tip.to_vec()
        };

        let mapped = self
            .tx_to_block_tree()?
            .get(txid)
            .map_err(|e| ChainError::Storage(format!("Failed to read tx-to-block entry: {e}")))?;

        if let Some(block_hash) = mapped {
            let candidates = vec![block_hash.to_vec()];
            if let Some(block_hash) = self
                .chain
                .choose_hash_under_tip(candidates.as_slice(), tip.as_slice())?
            {
                let block = self
                    .chain
                    .get_block(block_hash.as_slice())?
                    .ok_or_else(|| {
                        ChainError::NotFound(format!(
                            "Indexed block {} is missing",
                            HEXLOWER.encode(block_hash.as_slice())
                        ))
                    })?;
                for tx in block.get_transactions() {
                    if tx.get_id() == txid {
                        return Ok(Some((tx.clone(), block_hash, block.get_height())));
                    }
                }
                return Err(ChainError::NotFound(format!(
                    "Transaction {} is not in its indexed block",
                    HEXLOWER.encode(txid)
                )));
            }
        }

        self.chain.find_transaction(txid, tip.as_slice())
    }

    /// Spent-output records of `txid` restricted to one branch: the
    /// spending block must lie between the block that carries the
    /// transaction and `tip`.
    pub fn get_transaction_outputs_spent(
        &self,
        txid: &[u8],
        originating_block: &[u8],
        tip: &[u8],
    ) -> Result<Vec<SpentOutputRecord>> {
        let records = self.load_records(txid)?;
        if records.is_empty() {
            return Ok(records);
        }

        // hashes from the tip down to the originating block, inclusive
        let mut branch = HashSet::new();
        let mut cursor = tip.to_vec();
        let mut found_origin = false;
        while !cursor.is_empty() {
            branch.insert(cursor.clone());
            if cursor.as_slice() == originating_block {
                found_origin = true;
                break;
            }
            match self.chain.get_block(cursor.as_slice())? {
                Some(block) => cursor = block.get_pre_block_hash().to_vec(),
                None => break,
            }
        }
        if !found_origin {
            return Ok(vec![]);
        }

        Ok(records
            .into_iter()
            .filter(|r| branch.contains(&r.spending_block))
            .collect())
    }

    /// Throw both indices away and rebuild them from the block store.
    pub fn reindex(&self) -> Result<()> {
        self.tx_to_block_tree()?
            .clear()
            .map_err(|e| ChainError::Storage(format!("Failed to clear tx-to-block tree: {e}")))?;
        self.tx_spent_tree()?
            .clear()
            .map_err(|e| ChainError::Storage(format!("Failed to clear tx-spent tree: {e}")))?;

        let mut blocks = 0;
        for (hash, _, in_primary) in self.chain.chain_list()? {
            let block = self.chain.get_block(hash.as_slice())?.ok_or_else(|| {
                ChainError::NotFound(format!(
                    "Chain-list block {} is missing",
                    HEXLOWER.encode(hash.as_slice())
                ))
            })?;
            self.block_added(&block, in_primary)?;
            blocks += 1;
        }
        info!("Rebuilt transaction indices from {blocks} blocks");
        Ok(())
    }
}
