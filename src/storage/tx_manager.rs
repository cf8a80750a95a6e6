// Transaction-level orchestration across the pool, the unspent cache,
// and the indices: verification against the right branch, assembling and
// admitting new transactions, balances, and the cache hooks the node
// calls when blocks come and go.

use crate::core::{Block, TXInput, TXOutput, Transaction};
use crate::error::{ChainError, Result};
use crate::storage::pool::TransactionPool;
use crate::storage::{ChainStore, IndexManager, UtxoSet};
use crate::utils::sign_data;
use crate::wallet::{convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet};
use data_encoding::HEXLOWER;
use log::trace;
use std::collections::HashMap;

/// Balance of one address: confirmed outputs plus the net effect of
/// pending pool transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressBalance {
    pub approved: i64,
    pub pending: i64,
    pub total: i64,
}

pub struct TransactionsManager {
    chain: ChainStore,
}

impl TransactionsManager {
    pub fn new(chain: ChainStore) -> TransactionsManager {
        TransactionsManager { chain }
    }

    fn index(&self) -> IndexManager {
        IndexManager::new(self.chain.clone())
    }

    fn pool(&self) -> TransactionPool {
        TransactionPool::new(self.chain.clone())
    }

    fn unspent(&self) -> UtxoSet {
        UtxoSet::new(self.chain.clone())
    }

    /// Rebuild all derived caches from the block store. Returns the
    /// number of unspent records written.
    pub fn reindex_data(&self) -> Result<usize> {
        self.index().reindex()?;
        self.unspent().reindex()
    }

    pub fn get_address_balance(&self, address: &str) -> Result<AddressBalance> {
        if !validate_address(address) {
            return Err(ChainError::BadAddress(address.to_string()));
        }
        let approved = self.unspent().get_address_balance(address)?;
        let pending = self.get_address_pending_balance(address)?;
        Ok(AddressBalance {
            approved,
            pending,
            total: approved + pending,
        })
    }

    // What pending transactions give to and take from an address: the sum
    // of their still-free outputs minus the confirmed outputs they spend.
    fn get_address_pending_balance(&self, address: &str) -> Result<i64> {
        let pub_key_hash = pub_key_hash_from_address(address)?;
        let (_, free_outputs, approved_inputs) =
            self.pool().get_prepared_by(pub_key_hash.as_slice())?;

        let mut pending: i64 = 0;
        for out in &free_outputs {
            pending += out.value;
        }
        for input in &approved_inputs {
            match self.unspent().get_input_value(input) {
                Ok(value) => pending -= value,
                // a stale entry left behind by a reorg; block assembly
                // will cancel it, the balance stays best-effort
                Err(ChainError::NotFound(_)) => {
                    trace!(
                        "Pending input {} is not spendable anymore",
                        HEXLOWER.encode(input.get_txid())
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(pending)
    }

    pub fn get_pool_count(&self) -> Result<usize> {
        self.pool().get_count()
    }

    pub fn get_unspent_count(&self) -> Result<usize> {
        self.unspent().count_unspent_outputs()
    }

    pub fn get_unapproved_transactions(&self, number: usize) -> Result<Vec<Transaction>> {
        self.pool().get_transactions(number)
    }

    pub fn get_unspent_outputs(
        &self,
        address: &str,
    ) -> Result<Vec<crate::storage::UnspentOutput>> {
        self.unspent().get_unspent_outputs(address)
    }

    /// Drain pool candidates for a new block: oldest first, each verified
    /// against the chain and the batch built so far, then stripped of
    /// mutual conflicts. Entries that fail are removed from the pool for
    /// good.
    pub fn get_transactions_for_new_block(&self, number: usize) -> Result<Vec<Transaction>> {
        let pool = self.pool();
        let candidates = pool.get_transactions(number)?;
        trace!("Found {} candidate transactions", candidates.len());

        let mut accepted: Vec<Transaction> = vec![];
        for tx in candidates {
            match self.verify_transaction(&tx, accepted.as_slice(), &[]) {
                Ok(()) => accepted.push(tx),
                Err(e) => {
                    trace!(
                        "Dropping pool transaction {}: {e}",
                        HEXLOWER.encode(tx.get_id())
                    );
                    pool.delete(tx.get_id())?;
                }
            }
        }

        let (good, conflicting) = pool.detect_conflicts(accepted);
        for tx in &conflicting {
            trace!(
                "Removing conflicting pool transaction {}",
                HEXLOWER.encode(tx.get_id())
            );
            pool.delete(tx.get_id())?;
        }
        Ok(good)
    }

    /// Remove a pending transaction on request.
    pub fn cancel_transaction(&self, txid: &[u8]) -> Result<()> {
        if !self.pool().delete(txid)? {
            return Err(ChainError::NotFound(
                "Transaction is not in the list of unapproved".to_string(),
            ));
        }
        Ok(())
    }

    /// Deep verification for block assembly and block acceptance: inputs
    /// resolve on the branch ending at `tip` (the primary tip when
    /// empty), or among `prev_txs`, the transactions placed earlier in
    /// the same block.
    pub fn verify_transaction(
        &self,
        tx: &Transaction,
        prev_txs: &[Transaction],
        tip: &[u8],
    ) -> Result<()> {
        let (mut input_txs, not_found) = self.get_input_transactions_state(tx, tip)?;
        if !not_found.is_empty() {
            self.pool()
                .check_inputs_were_before(&not_found, prev_txs, &mut input_txs)?;
        }
        tx.verify(&input_txs)
    }

    /// Admission verification for a transaction arriving from a client
    /// or peer: inputs resolve in the unspent cache or among pending pool
    /// entries.
    pub fn verify_transaction_quick(&self, tx: &Transaction) -> Result<()> {
        let (mut input_txs, not_found) = self
            .unspent()
            .verify_transactions_outputs_are_not_spent(tx.get_vin())?;
        if !not_found.is_empty() {
            self.pool()
                .check_inputs_are_prepared(&not_found, &mut input_txs)?;
        }
        tx.verify(&input_txs)
    }

    // Resolve every input on the branch ending at `tip`. Inputs with no
    // transaction on that branch come back separately; inputs whose
    // output is already consumed on the branch fail outright.
    fn get_input_transactions_state(
        &self,
        tx: &Transaction,
        tip: &[u8],
    ) -> Result<(HashMap<usize, Transaction>, HashMap<usize, TXInput>)> {
        let mut input_txs = HashMap::new();
        let mut not_found = HashMap::new();

        if tx.is_coinbase() {
            return Ok((input_txs, not_found));
        }

        let tip = if tip.is_empty() {
            self.chain.get_top_hash()
        } else {
            tip.to_vec()
        };

        let index = self.index();
        for (idx, vin) in tx.get_vin().iter().enumerate() {
            match index.get_transaction_all_info(vin.get_txid(), tip.as_slice())? {
                None => {
                    not_found.insert(idx, vin.clone());
                }
                Some((prev_tx, block_hash, _)) => {
                    let spent = index.get_transaction_outputs_spent(
                        vin.get_txid(),
                        block_hash.as_slice(),
                        tip.as_slice(),
                    )?;
                    if spent.iter().any(|r| r.out_index == vin.get_vout()) {
                        return Err(ChainError::VerifyFailed(format!(
                            "Output {} of {} was already spent before",
                            vin.get_vout(),
                            HEXLOWER.encode(vin.get_txid())
                        )));
                    }
                    input_txs.insert(idx, prev_tx);
                }
            }
        }

        Ok((input_txs, not_found))
    }

    /// Build an unsigned transfer and the list of messages its inputs
    /// must sign. Confirmed outputs are preferred; pending outputs cover
    /// any remainder.
    pub fn prepare_new_transaction(
        &self,
        pub_key: &[u8],
        to: &str,
        amount: i64,
    ) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
        if amount <= 0 {
            return Err(ChainError::VerifyFailed(
                "Amount must be positive".to_string(),
            ));
        }

        let pub_key_hash = hash_pub_key(pub_key);
        let (pending_inputs, pending_outputs, _) =
            self.pool().get_prepared_by(pub_key_hash.as_slice())?;
        trace!(
            "Pending state: {} inputs, {} free outputs",
            pending_inputs.len(),
            pending_outputs.len()
        );

        let unspent = self.unspent();
        let (mut inputs, mut prev_txs, mut accumulated) =
            unspent.get_new_transaction_inputs(pub_key, to, amount, pending_inputs.as_slice())?;

        if accumulated < amount {
            if pending_outputs.is_empty() {
                return Err(ChainError::InsufficientFunds {
                    required: amount,
                    available: accumulated,
                });
            }
            (inputs, prev_txs, accumulated) = unspent.extend_new_transaction_inputs(
                pub_key,
                amount,
                accumulated,
                inputs,
                prev_txs,
                pending_outputs.as_slice(),
            )?;
        }

        if accumulated < amount {
            return Err(ChainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let from = convert_address(pub_key_hash.as_slice());
        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, from.as_str())?);
        }

        let input_txs: HashMap<usize, Transaction> = inputs
            .iter()
            .enumerate()
            .map(|(idx, vin)| {
                let tx = prev_txs[&HEXLOWER.encode(vin.get_txid())].clone();
                (idx, tx)
            })
            .collect();

        let tx = Transaction::new_unsigned(inputs, outputs)?;
        let sign_data = tx.prepare_sign_data(&input_txs)?;
        Ok((tx.serialize()?, sign_data))
    }

    /// Complete a transaction a client prepared earlier: attach the
    /// signatures, verify, and admit it to the pool.
    pub fn received_new_transaction_data(
        &self,
        tx_bytes: &[u8],
        signatures: Vec<Vec<u8>>,
    ) -> Result<Transaction> {
        let mut tx = Transaction::deserialize(tx_bytes)?;
        tx.set_signatures(signatures)?;
        self.received_new_transaction(&tx)?;
        Ok(tx)
    }

    /// Verify and pool a complete transaction received from a client or
    /// another node.
    pub fn received_new_transaction(&self, tx: &Transaction) -> Result<()> {
        self.verify_transaction_quick(tx)?;
        self.pool().add(tx)
    }

    /// The whole prepare/sign/admit flow with a local wallet.
    pub fn create_transaction(&self, wallet: &Wallet, to: &str, amount: i64) -> Result<Transaction> {
        let (tx_bytes, to_sign) =
            self.prepare_new_transaction(wallet.get_public_key(), to, amount)?;

        let mut signatures = Vec::with_capacity(to_sign.len());
        for data in &to_sign {
            signatures.push(sign_data(wallet.get_pkcs8(), data.as_slice())?);
        }

        self.received_new_transaction_data(tx_bytes.as_slice(), signatures)
    }

    /// A new block entered the store. Indices always learn about it; the
    /// pool and unspent cache only change when it joined the primary
    /// branch.
    pub fn block_added(&self, block: &Block, on_top: bool) -> Result<()> {
        self.index().block_added(block, on_top)?;
        if on_top {
            self.pool().delete_from_block(block)?;
            self.unspent().update_on_block_add(block)?;
        }
        Ok(())
    }

    /// A block was deleted from the top of the primary branch.
    pub fn block_removed(&self, block: &Block) -> Result<()> {
        self.pool().add_from_canceled(block.get_transactions())?;
        self.unspent().update_on_block_cancel(block)?;
        self.index().block_removed(block)
    }

    /// A stored side-branch block became primary during a reorg.
    pub fn block_added_to_primary(&self, block: &Block) -> Result<()> {
        self.pool().delete_from_block(block)?;
        self.unspent().update_on_block_add(block)?;
        self.index().promote_block(block)
    }

    /// A primary block moved to a side branch during a reorg. It stays
    /// in the store.
    pub fn block_removed_from_primary(&self, block: &Block) -> Result<()> {
        self.pool().add_from_canceled(block.get_transactions())?;
        self.unspent().update_on_block_cancel(block)?;
        self.index().demote_block(block)
    }
}
