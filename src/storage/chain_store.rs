// The chain store is the authoritative record: a block bucket, the
// top/first pointers, and the chain list that tells the primary branch
// apart from side branches. Everything else in storage/ is derived from
// it and can be rebuilt.

use crate::core::{Block, Transaction};
use crate::error::{ChainError, Result};
use crate::storage::db;
use data_encoding::HEXLOWER;
use log::info;
use sled::{Db, Transactional, Tree};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

const BLOCKS_TREE: &str = "blocks";
const STATE_TREE: &str = "state";
const CHAIN_TREE: &str = "chain";

const TOP_HASH_KEY: &str = "l";
const FIRST_HASH_KEY: &str = "f";

const PRIMARY_FLAG: u8 = 0x01;
const SIDE_FLAG: u8 = 0x00;

/// Outcome of inserting a block into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAddState {
    /// Block hash already present, nothing changed
    Exists,
    /// The parent is unknown; the caller has to fetch it first
    NoPrev,
    /// Extends the current top and became the new primary tip
    AddedToTop,
    /// Stored on a side branch; the primary branch is unchanged
    AddedToParallel,
    /// Stored on a side branch that is now strictly taller than the
    /// primary; the caller must drive the branch switch
    AddedToParallelTop,
}

// chain-list value: prev hash bytes followed by one flag byte
fn pack_chain_entry(prev_hash: &[u8], in_primary: bool) -> Vec<u8> {
    let mut value = prev_hash.to_vec();
    value.push(if in_primary { PRIMARY_FLAG } else { SIDE_FLAG });
    value
}

fn unpack_chain_entry(value: &[u8]) -> Result<(Vec<u8>, bool)> {
    if value.is_empty() {
        return Err(ChainError::Serialization(
            "Empty chain-list entry".to_string(),
        ));
    }
    let (prev, flag) = value.split_at(value.len() - 1);
    Ok((prev.to_vec(), flag[0] == PRIMARY_FLAG))
}

/// Sled-backed block storage plus chain topology.
#[derive(Clone)]
pub struct ChainStore {
    db: Db,
    top_hash: Arc<RwLock<Vec<u8>>>,
}

impl ChainStore {
    /// Initialize a new chain database holding only `genesis`. Fails when
    /// the directory already contains one.
    pub fn create(db_path: &Path, genesis: &Block) -> Result<ChainStore> {
        let db = db::open_database(db_path)?;
        let state_tree = open_tree(&db, STATE_TREE)?;

        if state_tree
            .get(TOP_HASH_KEY)
            .map_err(|e| ChainError::Storage(format!("Failed to read top hash: {e}")))?
            .is_some()
        {
            return Err(ChainError::Storage(
                "Blockchain already exists in this data directory".to_string(),
            ));
        }

        let store = ChainStore {
            db,
            top_hash: Arc::new(RwLock::new(vec![])),
        };

        info!(
            "Creating chain with genesis block {}",
            HEXLOWER.encode(genesis.get_hash())
        );
        store.put_block_on_top(genesis)?;

        let state_tree = store.state_tree()?;
        state_tree
            .insert(FIRST_HASH_KEY, genesis.get_hash())
            .map_err(|e| ChainError::Storage(format!("Failed to store first hash: {e}")))?;

        Ok(store)
    }

    /// Open an existing chain database.
    pub fn open(db_path: &Path) -> Result<ChainStore> {
        let db = db::open_database(db_path)?;
        let state_tree = open_tree(&db, STATE_TREE)?;

        let top_hash = state_tree
            .get(TOP_HASH_KEY)
            .map_err(|e| ChainError::Storage(format!("Failed to read top hash: {e}")))?
            .ok_or_else(|| {
                ChainError::NotFound("No blockchain found. Create one first.".to_string())
            })?
            .to_vec();

        Ok(ChainStore {
            db,
            top_hash: Arc::new(RwLock::new(top_hash)),
        })
    }

    fn blocks_tree(&self) -> Result<Tree> {
        open_tree(&self.db, BLOCKS_TREE)
    }

    fn state_tree(&self) -> Result<Tree> {
        open_tree(&self.db, STATE_TREE)
    }

    fn chain_tree(&self) -> Result<Tree> {
        open_tree(&self.db, CHAIN_TREE)
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    /// Hash of the highest primary-branch block.
    pub fn get_top_hash(&self) -> Vec<u8> {
        self.top_hash
            .read()
            .expect("Failed to acquire read lock on top hash - this should never happen")
            .clone()
    }

    fn set_top_hash(&self, hash: &[u8]) {
        let mut top_hash = self
            .top_hash
            .write()
            .expect("Failed to acquire write lock on top hash - this should never happen");
        *top_hash = hash.to_vec();
    }

    /// Hash of the genesis block.
    pub fn get_first_hash(&self) -> Result<Vec<u8>> {
        self.state_tree()?
            .get(FIRST_HASH_KEY)
            .map_err(|e| ChainError::Storage(format!("Failed to read first hash: {e}")))?
            .map(|v| v.to_vec())
            .ok_or_else(|| ChainError::NotFound("First hash is not recorded".to_string()))
    }

    pub fn get_block(&self, hash: &[u8]) -> Result<Option<Block>> {
        let bytes = self
            .blocks_tree()?
            .get(hash)
            .map_err(|e| ChainError::Storage(format!("Failed to read block: {e}")))?;
        match bytes {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn block_exists(&self, hash: &[u8]) -> Result<bool> {
        if hash.is_empty() {
            return Ok(false);
        }
        Ok(self
            .blocks_tree()?
            .get(hash)
            .map_err(|e| ChainError::Storage(format!("Failed to read block: {e}")))?
            .is_some())
    }

    /// Height of the primary tip.
    pub fn get_best_height(&self) -> Result<usize> {
        let top_hash = self.get_top_hash();
        let block = self
            .get_block(top_hash.as_slice())?
            .ok_or_else(|| ChainError::NotFound("Top block is missing".to_string()))?;
        Ok(block.get_height())
    }

    /// Total number of stored blocks across all branches.
    pub fn get_blocks_count(&self) -> Result<usize> {
        Ok(self.blocks_tree()?.len())
    }

    fn chain_entry(&self, hash: &[u8]) -> Result<Option<(Vec<u8>, bool)>> {
        let value = self
            .chain_tree()?
            .get(hash)
            .map_err(|e| ChainError::Storage(format!("Failed to read chain entry: {e}")))?;
        match value {
            Some(value) => Ok(Some(unpack_chain_entry(value.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Whether a block sits on the primary branch.
    pub fn is_in_primary(&self, hash: &[u8]) -> Result<bool> {
        Ok(matches!(self.chain_entry(hash)?, Some((_, true))))
    }

    /// Store a block and its chain-list entry without touching the top
    /// pointer. Used for side-branch blocks.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let block_data = block.serialize()?;
        let chain_entry = pack_chain_entry(block.get_pre_block_hash(), false);

        let blocks_tree = self.blocks_tree()?;
        let chain_tree = self.chain_tree()?;
        (&blocks_tree, &chain_tree)
            .transaction(|(blocks, chain)| {
                blocks.insert(block.get_hash(), block_data.as_slice())?;
                chain.insert(block.get_hash(), chain_entry.as_slice())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                ChainError::Storage(format!("Failed to store side block: {e}"))
            })?;

        Ok(())
    }

    /// Store a block as the new primary tip: block bucket, primary chain
    /// entry, and the top pointer move together.
    pub fn put_block_on_top(&self, block: &Block) -> Result<()> {
        let block_data = block.serialize()?;
        let chain_entry = pack_chain_entry(block.get_pre_block_hash(), true);

        let blocks_tree = self.blocks_tree()?;
        let state_tree = self.state_tree()?;
        let chain_tree = self.chain_tree()?;
        (&blocks_tree, &state_tree, &chain_tree)
            .transaction(|(blocks, state, chain)| {
                blocks.insert(block.get_hash(), block_data.as_slice())?;
                state.insert(TOP_HASH_KEY, block.get_hash())?;
                chain.insert(block.get_hash(), chain_entry.as_slice())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                ChainError::Storage(format!("Failed to store top block: {e}"))
            })?;

        self.set_top_hash(block.get_hash());
        Ok(())
    }

    /// Insert a chain-list entry for an already-stored block.
    pub fn add_to_chain(&self, hash: &[u8], prev_hash: &[u8], in_primary: bool) -> Result<()> {
        self.chain_tree()?
            .insert(hash, pack_chain_entry(prev_hash, in_primary))
            .map_err(|e| ChainError::Storage(format!("Failed to add chain entry: {e}")))?;
        Ok(())
    }

    /// Remove the chain-list entry of the current tip.
    pub fn remove_from_chain(&self, hash: &[u8]) -> Result<()> {
        if hash != self.get_top_hash().as_slice() {
            return Err(ChainError::VerifyFailed(
                "Only the tip can be removed from the chain list".to_string(),
            ));
        }
        self.chain_tree()?
            .remove(hash)
            .map_err(|e| ChainError::Storage(format!("Failed to remove chain entry: {e}")))?;
        Ok(())
    }

    /// Insert a block, classifying it against the current topology. The
    /// caller is expected to have verified the block already.
    pub fn add_block(&self, block: &Block) -> Result<BlockAddState> {
        if self.block_exists(block.get_hash())? {
            return Ok(BlockAddState::Exists);
        }
        if !self.block_exists(block.get_pre_block_hash())? {
            return Ok(BlockAddState::NoPrev);
        }

        let top_hash = self.get_top_hash();
        if block.get_pre_block_hash() == top_hash.as_slice() {
            self.put_block_on_top(block)?;
            return Ok(BlockAddState::AddedToTop);
        }

        // a parallel branch; the primary switches only when the branch
        // becomes strictly taller
        let best_height = self.get_best_height()?;
        self.put_block(block)?;

        if block.get_height() > best_height {
            Ok(BlockAddState::AddedToParallelTop)
        } else {
            Ok(BlockAddState::AddedToParallel)
        }
    }

    /// Remove the primary tip and point the top at its parent. Genesis
    /// stays; side-branch blocks cannot be deleted at all.
    pub fn delete_block(&self) -> Result<Block> {
        let top_hash = self.get_top_hash();
        let block = self
            .get_block(top_hash.as_slice())?
            .ok_or_else(|| ChainError::NotFound("Top block is missing".to_string()))?;

        if block.is_genesis() {
            return Err(ChainError::VerifyFailed(
                "The genesis block cannot be dropped".to_string(),
            ));
        }

        let prev_hash = block.get_pre_block_hash().to_vec();
        let blocks_tree = self.blocks_tree()?;
        let state_tree = self.state_tree()?;
        let chain_tree = self.chain_tree()?;
        (&blocks_tree, &state_tree, &chain_tree)
            .transaction(|(blocks, state, chain)| {
                blocks.remove(top_hash.as_slice())?;
                state.insert(TOP_HASH_KEY, prev_hash.as_slice())?;
                chain.remove(top_hash.as_slice())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                ChainError::Storage(format!("Failed to delete top block: {e}"))
            })?;

        self.set_top_hash(prev_hash.as_slice());
        info!("Dropped block {}", HEXLOWER.encode(top_hash.as_slice()));
        Ok(block)
    }

    /// Locate a block in the chain list: its parent hash and, when one
    /// exists, the next block above it on the primary branch. The "next"
    /// pointer is derived by walking down from the top, never stored.
    pub fn get_location_in_chain(
        &self,
        hash: &[u8],
    ) -> Result<Option<(Vec<u8>, Option<Vec<u8>>)>> {
        let Some((prev_hash, _)) = self.chain_entry(hash)? else {
            return Ok(None);
        };

        let mut next = None;
        let mut cursor = self.get_top_hash();
        while !cursor.is_empty() && cursor.as_slice() != hash {
            let Some((cursor_prev, _)) = self.chain_entry(cursor.as_slice())? else {
                break;
            };
            if cursor_prev.as_slice() == hash {
                next = Some(cursor);
                break;
            }
            cursor = cursor_prev;
        }

        Ok(Some((prev_hash, next)))
    }

    /// Whether `ancestor` lies on the path from `tip` down to genesis.
    /// A hash counts as its own ancestor.
    pub fn is_ancestor(&self, ancestor: &[u8], tip: &[u8]) -> Result<bool> {
        let mut cursor = tip.to_vec();
        loop {
            if cursor.as_slice() == ancestor {
                return Ok(true);
            }
            match self.chain_entry(cursor.as_slice())? {
                Some((prev, _)) if !prev.is_empty() => cursor = prev,
                _ => return Ok(false),
            }
        }
    }

    /// Pick the candidate block that lies under `tip`, if any.
    pub fn choose_hash_under_tip(
        &self,
        candidates: &[Vec<u8>],
        tip: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        for candidate in candidates {
            if self.is_ancestor(candidate.as_slice(), tip)? {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    /// Walk two branch tips back to their common ancestor. Returns the
    /// two disjoint branches `(new_chain, old_chain)`, each ordered from
    /// the block right above the ancestor up to its tip.
    pub fn get_branches_replacement(
        &self,
        side_tip: &[u8],
        cur_tip: &[u8],
    ) -> Result<(Vec<Block>, Vec<Block>)> {
        let mut primary_path = vec![];
        let mut cursor = cur_tip.to_vec();
        while !cursor.is_empty() {
            primary_path.push(cursor.clone());
            match self.chain_entry(cursor.as_slice())? {
                Some((prev, _)) => cursor = prev,
                None => break,
            }
        }
        let primary_set: HashSet<Vec<u8>> = primary_path.iter().cloned().collect();

        let mut new_chain = vec![];
        let mut cursor = side_tip.to_vec();
        while !primary_set.contains(&cursor) {
            let block = self.get_block(cursor.as_slice())?.ok_or_else(|| {
                ChainError::NotFound(format!(
                    "Side-branch block {} is missing",
                    HEXLOWER.encode(cursor.as_slice())
                ))
            })?;
            cursor = block.get_pre_block_hash().to_vec();
            new_chain.push(block);
            if cursor.is_empty() {
                break;
            }
        }
        new_chain.reverse();

        let common_ancestor = cursor;
        let mut old_chain = vec![];
        for hash in primary_path {
            if hash == common_ancestor {
                break;
            }
            let block = self.get_block(hash.as_slice())?.ok_or_else(|| {
                ChainError::NotFound(format!(
                    "Primary-branch block {} is missing",
                    HEXLOWER.encode(hash.as_slice())
                ))
            })?;
            old_chain.push(block);
        }
        old_chain.reverse();

        Ok((new_chain, old_chain))
    }

    /// Flip the primary flags of both branches and move the top pointer,
    /// all in one database transaction. A crash leaves the old branch or
    /// the new branch primary, never a mix.
    pub fn replace_primary_branch(&self, old_chain: &[Block], new_chain: &[Block]) -> Result<()> {
        let new_top = new_chain
            .last()
            .ok_or_else(|| {
                ChainError::VerifyFailed("Branch replacement needs a new tip".to_string())
            })?
            .get_hash_bytes();

        let state_tree = self.state_tree()?;
        let chain_tree = self.chain_tree()?;
        (&state_tree, &chain_tree)
            .transaction(|(state, chain)| {
                for block in old_chain {
                    chain.insert(
                        block.get_hash(),
                        pack_chain_entry(block.get_pre_block_hash(), false),
                    )?;
                }
                for block in new_chain {
                    chain.insert(
                        block.get_hash(),
                        pack_chain_entry(block.get_pre_block_hash(), true),
                    )?;
                }
                state.insert(TOP_HASH_KEY, new_top.as_slice())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                ChainError::Storage(format!("Failed to switch primary branch: {e}"))
            })?;

        self.set_top_hash(new_top.as_slice());
        info!(
            "Primary branch now ends at {}",
            HEXLOWER.encode(new_top.as_slice())
        );
        Ok(())
    }

    /// Scan the branch that ends at `from_hash` (the primary tip when
    /// empty) for a transaction. Returns the transaction, the hash of its
    /// block, and that block's height.
    pub fn find_transaction(
        &self,
        txid: &[u8],
        from_hash: &[u8],
    ) -> Result<Option<(Transaction, Vec<u8>, usize)>> {
        let mut cursor = if from_hash.is_empty() {
            self.get_top_hash()
        } else {
            from_hash.to_vec()
        };

        while !cursor.is_empty() {
            let Some(block) = self.get_block(cursor.as_slice())? else {
                return Ok(None);
            };
            for tx in block.get_transactions() {
                if tx.get_id() == txid {
                    return Ok(Some((
                        tx.clone(),
                        block.get_hash_bytes(),
                        block.get_height(),
                    )));
                }
            }
            cursor = block.get_pre_block_hash().to_vec();
        }
        Ok(None)
    }

    /// Iterate the primary branch from the tip down to genesis.
    pub fn iterator(&self) -> ChainStoreIterator {
        ChainStoreIterator {
            store: self.clone(),
            current_hash: self.get_top_hash(),
        }
    }

    /// Iterate every chain-list entry as `(hash, prev, in_primary)`.
    pub fn chain_list(&self) -> Result<Vec<(Vec<u8>, Vec<u8>, bool)>> {
        let mut entries = vec![];
        for item in self.chain_tree()?.iter() {
            let (key, value) =
                item.map_err(|e| ChainError::Storage(format!("Failed to scan chain list: {e}")))?;
            let (prev, in_primary) = unpack_chain_entry(value.as_ref())?;
            entries.push((key.to_vec(), prev, in_primary));
        }
        Ok(entries)
    }
}

fn open_tree(db: &Db, name: &str) -> Result<Tree> {
    db.open_tree(name)
        .map_err(|e| ChainError::Storage(format!("Failed to open tree {name}: {e}")))
}

pub struct ChainStoreIterator {
    store: ChainStore,
    current_hash: Vec<u8>,
}

impl Iterator for ChainStoreIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        let block = self.store.get_block(self.current_hash.as_slice()).ok()??;
        self.current_hash = block.get_pre_block_hash().to_vec();
        Some(block)
    }
}
