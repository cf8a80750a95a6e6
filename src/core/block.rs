use crate::core::{ProofOfWork, Transaction};
use crate::error::{ChainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use serde::{Deserialize, Serialize};
use sled::IVec;

/// A block: an ordered batch of transactions chained to its parent by
/// hash. The first transaction is always the coinbase paying the minter.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: Vec<u8>,
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
}

impl Block {
    /// Assemble and mine a block on top of `pre_block_hash`. The nonce
    /// search runs to completion before the block is returned.
    pub fn new_block(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        let mut block = Block::new_candidate(pre_block_hash, transactions, height)?;

        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let (nonce, hash) = pow.run();
        block.nonce = nonce;
        block.hash = hash;

        Ok(block)
    }

    /// Assemble a block without running the nonce search. The hash stays
    /// empty until `complete`.
    pub fn new_candidate(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(ChainError::VerifyFailed(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        Ok(Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: vec![],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
        })
    }

    /// Attach the result of a finished nonce search.
    pub fn complete(&mut self, nonce: i64, hash: Vec<u8>) {
        self.nonce = nonce;
        self.hash = hash;
    }

    pub fn generate_genesis_block(coinbase: &Transaction) -> Result<Block> {
        Block::new_block(vec![], &[coinbase.clone()], 0)
    }

    /// SHA-256 over the concatenation of the transaction ids in block
    /// order. Part of the block hash preimage.
    pub fn hash_transactions(&self) -> Vec<u8> {
        let mut tx_ids = vec![];
        for transaction in &self.transactions {
            tx_ids.extend(transaction.get_id());
        }
        sha256_digest(tx_ids.as_slice())
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_bytes(&self) -> Vec<u8> {
        self.hash.clone()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }
}

impl From<Block> for IVec {
    fn from(b: Block) -> Self {
        let bytes =
            serialize(&b).expect("Block serialization should never fail for IVec conversion");
        Self::from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    #[test]
    fn test_genesis_block() {
        let wallet = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), b"hello").unwrap();
        let block = Block::generate_genesis_block(&coinbase).unwrap();

        assert!(block.is_genesis());
        assert_eq!(block.get_height(), 0);
        assert_eq!(block.get_hash().len(), 32);
        assert!(ProofOfWork::validate(&block));
    }

    #[test]
    fn test_empty_block_is_rejected() {
        let result = Block::new_candidate(vec![], &[], 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let wallet = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), &[]).unwrap();
        let block = Block::generate_genesis_block(&coinbase).unwrap();

        let bytes = block.serialize().unwrap();
        let decoded = Block::deserialize(bytes.as_slice()).unwrap();

        assert_eq!(decoded.get_hash(), block.get_hash());
        assert_eq!(decoded.get_height(), block.get_height());
        assert_eq!(decoded.get_nonce(), block.get_nonce());
        assert_eq!(decoded.get_timestamp(), block.get_timestamp());
        assert_eq!(decoded.get_transactions().len(), 1);
    }
}
