use crate::core::Block;
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::info;
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Required leading zero bits of a block hash. The target is constant;
/// there is no retargeting.
pub const TARGET_BITS: u32 = 16;

const MAX_NONCE: i64 = i64::MAX;

/// The nonce search over a candidate block. Pure computation: holds its
/// own copy of the block and touches no storage, so callers can run it
/// outside the chain-state lock.
pub struct ProofOfWork {
    block: Block,
    target: BigInt,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block) -> ProofOfWork {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        ProofOfWork { block, target }
    }

    /// Check a finished block: its stored nonce must produce a hash under
    /// the target.
    pub fn validate(block: &Block) -> bool {
        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());
        hash_int < pow.target
    }

    /// Recompute the hash a finished block should carry.
    pub fn compute_hash(block: &Block) -> Vec<u8> {
        let pow = ProofOfWork::new_proof_of_work(block.clone());
        sha256_digest(pow.prepare_data(block.get_nonce()).as_slice())
    }

    // Hash preimage: prev hash, tx-ids hash, then timestamp, target bits
    // and nonce as big-endian integers.
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash());
        data_bytes.extend(self.block.hash_transactions());
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(TARGET_BITS.to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    /// Iterate the nonce from zero until the hash drops under the target.
    pub fn run(&self) -> (i64, Vec<u8>) {
        let mut nonce = 0;
        let mut hash = Vec::new();

        while nonce < MAX_NONCE {
            let data = self.prepare_data(nonce);
            hash = sha256_digest(data.as_slice());
            let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

            if hash_int < self.target {
                break;
            }
            nonce += 1;
        }

        info!(
            "Found block hash {} at nonce {}",
            HEXLOWER.encode(hash.as_slice()),
            nonce
        );
        (nonce, hash)
    }
}
