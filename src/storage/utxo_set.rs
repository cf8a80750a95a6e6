// The unspent-output cache for the primary branch. Each record keeps the
// full output vector of one transaction with spent slots zeroed in
// place, so output indices stay valid while a transaction is partially
// spent. A record disappears once every slot is zeroed.

use crate::core::{Block, TXInput, TXOutput, Transaction};
use crate::error::{ChainError, Result};
use crate::storage::pool::PendingOutput;
use crate::storage::{ChainStore, IndexManager};
use crate::wallet::{hash_pub_key, pub_key_hash_from_address, validate_address};
use data_encoding::HEXLOWER;
use log::info;
use sled::Tree;
use std::collections::{HashMap, HashSet};

const UTXO_TREE: &str = "chainstate";

/// One spendable output, as reported to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct UnspentOutput {
    pub txid: Vec<u8>,
    pub out_index: i32,
    pub value: i64,
}

pub struct UtxoSet {
    chain: ChainStore,
}

impl UtxoSet {
    pub fn new(chain: ChainStore) -> UtxoSet {
        UtxoSet { chain }
    }

    fn utxo_tree(&self) -> Result<Tree> {
        self.chain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| ChainError::Storage(format!("Failed to open UTXO tree: {e}")))
    }

    fn load_outputs(&self, txid: &[u8]) -> Result<Option<Vec<TXOutput>>> {
        let bytes = self
            .utxo_tree()?
            .get(txid)
            .map_err(|e| ChainError::Storage(format!("Failed to read UTXO record: {e}")))?;
        match bytes {
            Some(bytes) => Ok(Some(crate::utils::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn store_outputs(&self, txid: &[u8], outputs: &[TXOutput]) -> Result<()> {
        let tree = self.utxo_tree()?;
        if outputs.iter().all(|out| out.is_zeroed()) {
            tree.remove(txid)
                .map_err(|e| ChainError::Storage(format!("Failed to remove UTXO record: {e}")))?;
        } else {
            tree.insert(txid, crate::utils::serialize(&outputs.to_vec())?)
                .map_err(|e| ChainError::Storage(format!("Failed to store UTXO record: {e}")))?;
        }
        Ok(())
    }

    /// Apply a block that joined the primary branch: zero the slots its
    /// inputs consume, then insert the output vectors of its own
    /// transactions. Later transactions of the block may spend earlier
    /// ones, so the order matters.
    pub fn update_on_block_add(&self, block: &Block) -> Result<()> {
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let mut outputs = self.load_outputs(vin.get_txid())?.ok_or_else(|| {
                        ChainError::NotFound(format!(
                            "Input of {} references unknown unspent record {}",
                            HEXLOWER.encode(tx.get_id()),
                            HEXLOWER.encode(vin.get_txid())
                        ))
                    })?;
                    let idx = vin.out_index()?;
                    if idx >= outputs.len() || outputs[idx].is_zeroed() {
                        return Err(ChainError::VerifyFailed(format!(
                            "Input of {} spends an already spent output",
                            HEXLOWER.encode(tx.get_id())
                        )));
                    }
                    outputs[idx] = TXOutput::zeroed();
                    self.store_outputs(vin.get_txid(), outputs.as_slice())?;
                }
            }
            self.store_outputs(tx.get_id(), tx.get_vout())?;
        }
        Ok(())
    }

    /// Undo a block that left the primary branch: drop its own records
    /// and restore the outputs its inputs had consumed, looked up on the
    /// branch below the block. Inputs referencing transactions of the
    /// same block need no restore since those records are gone entirely.
    pub fn update_on_block_cancel(&self, block: &Block) -> Result<()> {
        let block_txids: HashSet<Vec<u8>> = block
            .get_transactions()
            .iter()
            .map(|tx| tx.get_id_bytes())
            .collect();

        let tree = self.utxo_tree()?;
        for tx in block.get_transactions() {
            tree.remove(tx.get_id())
                .map_err(|e| ChainError::Storage(format!("Failed to remove UTXO record: {e}")))?;
        }

        for tx in block.get_transactions() {
            if tx.is_coinbase() {
                continue;
            }
            for vin in tx.get_vin() {
                if block_txids.contains(vin.get_txid()) {
                    continue;
                }
                let (prev_tx, _, _) = self
                    .chain
                    .find_transaction(vin.get_txid(), block.get_pre_block_hash())?
                    .ok_or_else(|| {
                        ChainError::NotFound(format!(
                            "Referenced transaction {} is not on the chain",
                            HEXLOWER.encode(vin.get_txid())
                        ))
                    })?;

                let mut outputs = self
                    .load_outputs(vin.get_txid())?
                    .unwrap_or_else(|| vec![TXOutput::zeroed(); prev_tx.get_vout().len()]);
                let idx = vin.out_index()?;
                outputs[idx] = prev_tx.get_vout()[idx].clone();
                self.store_outputs(vin.get_txid(), outputs.as_slice())?;
            }
        }
        Ok(())
    }

    /// Collect inputs for a new transaction from the confirmed unspent
    /// outputs owned by `pub_key`, skipping everything in
    /// `exclude_inputs` (outputs already promised to pending
    /// transactions). Stops as soon as `amount` is reached.
    pub fn get_new_transaction_inputs(
        &self,
        pub_key: &[u8],
        to: &str,
        amount: i64,
        exclude_inputs: &[TXInput],
    ) -> Result<(Vec<TXInput>, HashMap<String, Transaction>, i64)> {
        if !validate_address(to) {
            return Err(ChainError::BadAddress(to.to_string()));
        }

        let pub_key_hash = hash_pub_key(pub_key);
        let excluded: HashSet<(Vec<u8>, i32)> = exclude_inputs
            .iter()
            .map(|vin| (vin.get_txid().to_vec(), vin.get_vout()))
            .collect();

        let index = IndexManager::new(self.chain.clone());
        let mut inputs = vec![];
        let mut prev_txs: HashMap<String, Transaction> = HashMap::new();
        let mut accumulated: i64 = 0;

        for item in self.utxo_tree()?.iter() {
            let (txid, outs_bytes) = item
                .map_err(|e| ChainError::Storage(format!("Failed to scan UTXO tree: {e}")))?;
            let outputs: Vec<TXOutput> = crate::utils::deserialize(outs_bytes.as_ref())?;

            for (idx, out) in outputs.iter().enumerate() {
                if accumulated >= amount {
                    break;
                }
                if out.is_zeroed() || !out.is_locked_with_key(pub_key_hash.as_slice()) {
                    continue;
                }
                if excluded.contains(&(txid.to_vec(), idx as i32)) {
                    continue;
                }

                accumulated += out.get_value();
                inputs.push(TXInput::new(txid.as_ref(), idx as i32, pub_key));

                let txid_hex = HEXLOWER.encode(txid.as_ref());
                if !prev_txs.contains_key(txid_hex.as_str()) {
                    let (tx, _, _) = index
                        .get_transaction_all_info(txid.as_ref(), &[])?
                        .ok_or_else(|| {
                            ChainError::NotFound(format!(
                                "Unspent record {txid_hex} has no transaction on the chain"
                            ))
                        })?;
                    prev_txs.insert(txid_hex, tx);
                }
            }
            if accumulated >= amount {
                break;
            }
        }

        Ok((inputs, prev_txs, accumulated))
    }

    /// Top up prepared inputs from still-unspent outputs of pending pool
    /// transactions. Used when confirmed funds alone do not cover the
    /// requested amount.
    pub fn extend_new_transaction_inputs(
        &self,
        pub_key: &[u8],
        amount: i64,
        mut accumulated: i64,
        mut inputs: Vec<TXInput>,
        mut prev_txs: HashMap<String, Transaction>,
        pending_outputs: &[PendingOutput],
    ) -> Result<(Vec<TXInput>, HashMap<String, Transaction>, i64)> {
        for pending in pending_outputs {
            if accumulated >= amount {
                break;
            }
            accumulated += pending.value;
            inputs.push(TXInput::new(
                pending.txid.as_slice(),
                pending.out_index,
                pub_key,
            ));
            prev_txs.insert(
                HEXLOWER.encode(pending.txid.as_slice()),
                pending.tx.clone(),
            );
        }
        Ok((inputs, prev_txs, accumulated))
    }

    /// Confirmed balance: the sum of unspent outputs owned by the
    /// address.
    pub fn get_address_balance(&self, address: &str) -> Result<i64> {
        let pub_key_hash = pub_key_hash_from_address(address)?;
        let mut balance: i64 = 0;

        for item in self.utxo_tree()?.iter() {
            let (_, outs_bytes) = item
                .map_err(|e| ChainError::Storage(format!("Failed to scan UTXO tree: {e}")))?;
            let outputs: Vec<TXOutput> = crate::utils::deserialize(outs_bytes.as_ref())?;
            for out in outputs.iter() {
                if !out.is_zeroed() && out.is_locked_with_key(pub_key_hash.as_slice()) {
                    balance += out.get_value();
                }
            }
        }
        Ok(balance)
    }

    /// Value of the output an input references, as long as it is still
    /// unspent on the primary branch.
    pub fn get_input_value(&self, input: &TXInput) -> Result<i64> {
        let outputs = self.load_outputs(input.get_txid())?.ok_or_else(|| {
            ChainError::NotFound(format!(
                "No unspent record for {}",
                HEXLOWER.encode(input.get_txid())
            ))
        })?;
        let idx = input.out_index()?;
        match outputs.get(idx) {
            Some(out) if !out.is_zeroed() => Ok(out.get_value()),
            _ => Err(ChainError::NotFound(format!(
                "Output {} of {} is not unspent",
                input.get_vout(),
                HEXLOWER.encode(input.get_txid())
            ))),
        }
    }

    /// Split inputs into those whose referenced output is still unspent
    /// (resolved to their full transactions) and those with no unspent
    /// record at all, which the caller checks against the pool. An input
    /// pointing at a known record's spent slot is an outright failure.
    pub fn verify_transactions_outputs_are_not_spent(
        &self,
        vins: &[TXInput],
    ) -> Result<(HashMap<usize, Transaction>, HashMap<usize, TXInput>)> {
        let index = IndexManager::new(self.chain.clone());
        let mut input_txs = HashMap::new();
        let mut not_found = HashMap::new();

        for (idx, vin) in vins.iter().enumerate() {
            match self.load_outputs(vin.get_txid())? {
                None => {
                    not_found.insert(idx, vin.clone());
                }
                Some(outputs) => {
                    let out_idx = vin.out_index()?;
                    match outputs.get(out_idx) {
                        Some(out) if !out.is_zeroed() => {
                            let (tx, _, _) = index
                                .get_transaction_all_info(vin.get_txid(), &[])?
                                .ok_or_else(|| {
                                    ChainError::NotFound(format!(
                                        "Unspent record {} has no transaction on the chain",
                                        HEXLOWER.encode(vin.get_txid())
                                    ))
                                })?;
                            input_txs.insert(idx, tx);
                        }
                        _ => {
                            return Err(ChainError::VerifyFailed(format!(
                                "Output {} of {} was already spent",
                                vin.get_vout(),
                                HEXLOWER.encode(vin.get_txid())
                            )));
                        }
                    }
                }
            }
        }
        Ok((input_txs, not_found))
    }

    /// Number of unspent outputs across all records.
    pub fn count_unspent_outputs(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.utxo_tree()?.iter() {
            let (_, outs_bytes) = item
                .map_err(|e| ChainError::Storage(format!("Failed to scan UTXO tree: {e}")))?;
            let outputs: Vec<TXOutput> = crate::utils::deserialize(outs_bytes.as_ref())?;
            count += outputs.iter().filter(|out| !out.is_zeroed()).count();
        }
        Ok(count)
    }

    /// All unspent outputs owned by an address.
    pub fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>> {
        let pub_key_hash = pub_key_hash_from_address(address)?;
        let mut result = vec![];

        for item in self.utxo_tree()?.iter() {
            let (txid, outs_bytes) = item
                .map_err(|e| ChainError::Storage(format!("Failed to scan UTXO tree: {e}")))?;
            let outputs: Vec<TXOutput> = crate::utils::deserialize(outs_bytes.as_ref())?;
            for (idx, out) in outputs.iter().enumerate() {
                if !out.is_zeroed() && out.is_locked_with_key(pub_key_hash.as_slice()) {
                    result.push(UnspentOutput {
                        txid: txid.to_vec(),
                        out_index: idx as i32,
                        value: out.get_value(),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Rebuild the whole cache from the primary branch. Returns the
    /// number of records written.
    pub fn reindex(&self) -> Result<usize> {
        let tree = self.utxo_tree()?;
        tree.clear()
            .map_err(|e| ChainError::Storage(format!("Failed to clear UTXO tree: {e}")))?;

        // walk from the tip down; spends are always seen before the
        // outputs they consume
        let mut spent: HashMap<Vec<u8>, HashSet<i32>> = HashMap::new();
        let mut records = 0;

        for block in self.chain.iterator() {
            for tx in block.get_transactions() {
                if !tx.is_coinbase() {
                    for vin in tx.get_vin() {
                        spent
                            .entry(vin.get_txid().to_vec())
                            .or_default()
                            .insert(vin.get_vout());
                    }
                }
            }
            for tx in block.get_transactions() {
                let spent_slots = spent.get(tx.get_id());
                let outputs: Vec<TXOutput> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .map(|(idx, out)| {
                        if spent_slots.is_some_and(|slots| slots.contains(&(idx as i32))) {
                            TXOutput::zeroed()
                        } else {
                            out.clone()
                        }
                    })
                    .collect();
                if outputs.iter().any(|out| !out.is_zeroed()) {
                    tree.insert(tx.get_id(), crate::utils::serialize(&outputs)?)
                        .map_err(|e| {
                            ChainError::Storage(format!("Failed to store UTXO record: {e}"))
                        })?;
                    records += 1;
                }
            }
        }

        info!("Rebuilt the unspent-output cache: {records} records");
        Ok(records)
    }
}
