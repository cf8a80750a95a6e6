// The pool of unapproved transactions, persisted alongside the chain.
// Admission refuses any transaction sharing an input with an existing
// entry, so the pool never holds two spenders of the same output.

use crate::core::{Block, TXInput, Transaction};
use crate::error::{ChainError, Result};
use crate::storage::ChainStore;
use data_encoding::HEXLOWER;
use log::{trace, warn};
use sled::Tree;
use std::collections::HashMap;

const POOL_TREE: &str = "pool";

/// An output of a pending transaction that no other pending transaction
/// consumes yet. Carries its full transaction so a new spender can be
/// signed against it.
#[derive(Debug, Clone)]
pub struct PendingOutput {
    pub txid: Vec<u8>,
    pub out_index: i32,
    pub value: i64,
    pub tx: Transaction,
}

pub struct TransactionPool {
    chain: ChainStore,
}

impl TransactionPool {
    pub fn new(chain: ChainStore) -> TransactionPool {
        TransactionPool { chain }
    }

    fn pool_tree(&self) -> Result<Tree> {
        self.chain
            .get_db()
            .open_tree(POOL_TREE)
            .map_err(|e| ChainError::Storage(format!("Failed to open pool tree: {e}")))
    }

    /// Admit a verified transaction. Fails with `PoolConflict` when an
    /// existing entry already spends one of its inputs.
    pub fn add(&self, tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Err(ChainError::VerifyFailed(
                "Coinbase transactions do not enter the pool".to_string(),
            ));
        }

        if let Some(conflict) = self.detect_conflicts_for_new(tx)? {
            return Err(ChainError::PoolConflict(format!(
                "Conflicts with pooled transaction {}",
                HEXLOWER.encode(conflict.get_id())
            )));
        }

        trace!("Pool add {}", HEXLOWER.encode(tx.get_id()));
        self.pool_tree()?
            .insert(tx.get_id(), tx.serialize()?)
            .map_err(|e| ChainError::Storage(format!("Failed to store pool entry: {e}")))?;
        Ok(())
    }

    pub fn get_if_exists(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        let bytes = self
            .pool_tree()?
            .get(txid)
            .map_err(|e| ChainError::Storage(format!("Failed to read pool entry: {e}")))?;
        match bytes {
            Some(bytes) => Ok(Some(Transaction::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Remove one entry; reports whether it existed.
    pub fn delete(&self, txid: &[u8]) -> Result<bool> {
        let removed = self
            .pool_tree()?
            .remove(txid)
            .map_err(|e| ChainError::Storage(format!("Failed to remove pool entry: {e}")))?;
        Ok(removed.is_some())
    }

    /// Drop every transaction of a freshly applied block from the pool.
    pub fn delete_from_block(&self, block: &Block) -> Result<()> {
        trace!(
            "Pool cleanup for block {}",
            HEXLOWER.encode(block.get_hash())
        );
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                self.delete(tx.get_id())?;
            }
        }
        Ok(())
    }

    /// Reinsert the transactions of a block removed from the primary
    /// branch. Coinbases are skipped; entries that no longer pass
    /// admission (typically conflicts with the replacing branch) are
    /// logged and dropped without failing the batch.
    pub fn add_from_canceled(&self, txs: &[Transaction]) -> Result<()> {
        for tx in txs {
            if tx.is_coinbase() {
                continue;
            }
            if let Err(e) = self.add(tx) {
                warn!(
                    "Could not return {} to the pool: {e}",
                    HEXLOWER.encode(tx.get_id())
                );
            }
        }
        Ok(())
    }

    /// Up to `number` pool entries, oldest first.
    pub fn get_transactions(&self, number: usize) -> Result<Vec<Transaction>> {
        let mut txs = vec![];
        for item in self.pool_tree()?.iter() {
            let (_, bytes) = item
                .map_err(|e| ChainError::Storage(format!("Failed to scan pool tree: {e}")))?;
            txs.push(Transaction::deserialize(bytes.as_ref())?);
            if txs.len() >= number {
                break;
            }
        }
        txs.sort_by_key(|tx| tx.get_timestamp());
        Ok(txs)
    }

    pub fn get_count(&self) -> Result<usize> {
        Ok(self.pool_tree()?.len())
    }

    /// Scan the pool for an entry spending any input of `txcheck`.
    pub fn detect_conflicts_for_new(&self, txcheck: &Transaction) -> Result<Option<Transaction>> {
        for item in self.pool_tree()?.iter() {
            let (_, bytes) = item
                .map_err(|e| ChainError::Storage(format!("Failed to scan pool tree: {e}")))?;
            let existing = Transaction::deserialize(bytes.as_ref())?;

            for vin in txcheck.get_vin() {
                for existing_vin in existing.get_vin() {
                    if vin.get_txid() == existing_vin.get_txid()
                        && vin.get_vout() == existing_vin.get_vout()
                    {
                        return Ok(Some(existing));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Partition a batch so that no two kept transactions spend the same
    /// output. The earlier entry of a conflicting pair wins.
    pub fn detect_conflicts(
        &self,
        txs: Vec<Transaction>,
    ) -> (Vec<Transaction>, Vec<Transaction>) {
        let mut good = vec![];
        let mut conflicts = vec![];
        let mut used_outputs: HashMap<Vec<u8>, Vec<i32>> = HashMap::new();

        for tx in txs {
            let mut used = false;
            for vin in tx.get_vin() {
                let outs = used_outputs.entry(vin.get_txid().to_vec()).or_default();
                if outs.contains(&vin.get_vout()) {
                    used = true;
                    break;
                }
                outs.push(vin.get_vout());
            }
            if used {
                conflicts.push(tx);
            } else {
                good.push(tx);
            }
        }

        (good, conflicts)
    }

    /// Resolve inputs that were not found in the unspent cache against
    /// the pool itself, enforcing that no output is referenced twice.
    pub fn check_inputs_are_prepared(
        &self,
        inputs: &HashMap<usize, TXInput>,
        input_txs: &mut HashMap<usize, Transaction>,
    ) -> Result<()> {
        let mut checked: HashMap<String, Vec<i32>> = HashMap::new();

        for (&idx, vin) in inputs {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if let Some(outs) = checked.get(txid_hex.as_str()) {
                if outs.contains(&vin.get_vout()) {
                    return Err(ChainError::VerifyFailed(format!(
                        "Duplicate usage of transaction output: {txid_hex} - {}",
                        vin.get_vout()
                    )));
                }
            }

            let tx = self.get_if_exists(vin.get_txid())?.ok_or_else(|| {
                ChainError::VerifyFailed(format!(
                    "Input transaction {txid_hex} is not found among pending"
                ))
            })?;
            input_txs.insert(idx, tx);
            checked.entry(txid_hex).or_default().push(vin.get_vout());
        }
        Ok(())
    }

    /// Resolve inputs that were not found in the unspent cache against
    /// the transactions placed earlier in the same candidate block.
    pub fn check_inputs_were_before(
        &self,
        inputs: &HashMap<usize, TXInput>,
        prev_txs: &[Transaction],
        input_txs: &mut HashMap<usize, Transaction>,
    ) -> Result<()> {
        let mut checked: HashMap<String, Vec<i32>> = HashMap::new();

        for (&idx, vin) in inputs {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if let Some(outs) = checked.get(txid_hex.as_str()) {
                if outs.contains(&vin.get_vout()) {
                    return Err(ChainError::VerifyFailed(
                        "Duplicate usage of transaction output".to_string(),
                    ));
                }
            }

            let tx = prev_txs
                .iter()
                .find(|tx| tx.get_id() == vin.get_txid())
                .ok_or_else(|| {
                    ChainError::VerifyFailed(format!(
                        "Input transaction {txid_hex} is not found among earlier transactions"
                    ))
                })?;
            input_txs.insert(idx, tx.clone());
            checked.entry(txid_hex).or_default().push(vin.get_vout());
        }
        Ok(())
    }

    /// Everything the pool knows about an owner: the inputs their pending
    /// transactions use, their pending outputs no other pending entry has
    /// consumed, and the sublist of inputs that rest on confirmed
    /// outputs.
    pub fn get_prepared_by(
        &self,
        pub_key_hash: &[u8],
    ) -> Result<(Vec<TXInput>, Vec<PendingOutput>, Vec<TXInput>)> {
        let mut inputs: Vec<TXInput> = vec![];
        let mut outputs: Vec<PendingOutput> = vec![];

        for item in self.pool_tree()?.iter() {
            let (_, bytes) = item
                .map_err(|e| ChainError::Storage(format!("Failed to scan pool tree: {e}")))?;
            let tx = Transaction::deserialize(bytes.as_ref())?;

            for vin in tx.get_vin() {
                if vin.uses_key(pub_key_hash) {
                    inputs.push(vin.clone());
                }
            }
            for (idx, vout) in tx.get_vout().iter().enumerate() {
                if vout.is_locked_with_key(pub_key_hash) {
                    outputs.push(PendingOutput {
                        txid: tx.get_id_bytes(),
                        out_index: idx as i32,
                        value: vout.get_value(),
                        tx: tx.clone(),
                    });
                }
            }
        }

        // outputs no pending input has consumed yet
        let free_outputs: Vec<PendingOutput> = outputs
            .iter()
            .filter(|out| {
                !inputs
                    .iter()
                    .any(|vin| vin.get_txid() == out.txid && vin.get_vout() == out.out_index)
            })
            .cloned()
            .collect();

        // inputs that rest on confirmed outputs rather than pending ones
        let approved_inputs: Vec<TXInput> = inputs
            .iter()
            .filter(|vin| {
                !outputs
                    .iter()
                    .any(|out| vin.get_txid() == out.txid && vin.get_vout() == out.out_index)
            })
            .cloned()
            .collect();

        Ok((inputs, free_outputs, approved_inputs))
    }

    /// Drop every entry.
    pub fn clean(&self) -> Result<()> {
        self.pool_tree()?
            .clear()
            .map_err(|e| ChainError::Storage(format!("Failed to clear pool tree: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Block, TXOutput};
    use crate::wallet::Wallet;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_pool(dir: &std::path::Path) -> TransactionPool {
        let wallet = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), &[]).unwrap();
        let genesis = Block::generate_genesis_block(&coinbase).unwrap();
        TransactionPool::new(ChainStore::create(dir, &genesis).unwrap())
    }

    // an unsigned entry is enough for pool-level checks
    fn pending_tx(spends: &[(Vec<u8>, i32)], to: &Wallet) -> Transaction {
        let inputs = spends
            .iter()
            .map(|(txid, vout)| TXInput::new(txid.as_slice(), *vout, b"sender-key"))
            .collect();
        let outputs = vec![TXOutput::new(100, &to.get_address()).unwrap()];
        Transaction::new_unsigned(inputs, outputs).unwrap()
    }

    #[test]
    fn test_add_and_conflict() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        let recipient = Wallet::new().unwrap();

        let first = pending_tx(&[(vec![1; 32], 0)], &recipient);
        pool.add(&first).unwrap();
        assert_eq!(pool.get_count().unwrap(), 1);
        assert!(pool.get_if_exists(first.get_id()).unwrap().is_some());

        // same output, different transaction
        let double_spend = pending_tx(&[(vec![1; 32], 0), (vec![2; 32], 1)], &recipient);
        assert!(matches!(
            pool.add(&double_spend),
            Err(ChainError::PoolConflict(_))
        ));
        assert_eq!(pool.get_count().unwrap(), 1);

        // a different output of the same transaction is fine
        let sibling = pending_tx(&[(vec![1; 32], 1)], &recipient);
        pool.add(&sibling).unwrap();
        assert_eq!(pool.get_count().unwrap(), 2);
    }

    #[test]
    fn test_delete_and_clean() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        let recipient = Wallet::new().unwrap();

        let tx = pending_tx(&[(vec![3; 32], 0)], &recipient);
        pool.add(&tx).unwrap();

        assert!(pool.delete(tx.get_id()).unwrap());
        assert!(!pool.delete(tx.get_id()).unwrap());

        pool.add(&tx).unwrap();
        pool.clean().unwrap();
        assert_eq!(pool.get_count().unwrap(), 0);
    }

    #[test]
    fn test_get_transactions_is_timestamp_ordered() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        let recipient = Wallet::new().unwrap();

        let mut expected = vec![];
        for i in 0..4u8 {
            let tx = pending_tx(&[(vec![i; 32], 0)], &recipient);
            expected.push(tx.get_id_bytes());
            pool.add(&tx).unwrap();
            thread::sleep(Duration::from_millis(2));
        }

        let drained = pool.get_transactions(10).unwrap();
        let ids: Vec<Vec<u8>> = drained.iter().map(|tx| tx.get_id_bytes()).collect();
        assert_eq!(ids, expected);

        assert_eq!(pool.get_transactions(2).unwrap().len(), 2);
    }

    #[test]
    fn test_detect_conflicts_keeps_the_earlier_entry() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        let recipient = Wallet::new().unwrap();

        let a = pending_tx(&[(vec![7; 32], 0)], &recipient);
        thread::sleep(Duration::from_millis(2));
        let b = pending_tx(&[(vec![7; 32], 0)], &recipient);
        let c = pending_tx(&[(vec![8; 32], 0)], &recipient);

        let (good, conflicts) = pool.detect_conflicts(vec![a.clone(), b.clone(), c.clone()]);
        let good_ids: Vec<Vec<u8>> = good.iter().map(|tx| tx.get_id_bytes()).collect();
        assert_eq!(good_ids, vec![a.get_id_bytes(), c.get_id_bytes()]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].get_id(), b.get_id());
    }
}
