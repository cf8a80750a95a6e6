// Transactions move value between addresses following the UTXO model:
// every input consumes an output of an earlier transaction, and the sums
// must match exactly. There are no fees anywhere in this design.

use crate::core::monetary::PAYMENT_FOR_BLOCK_MADE;
use crate::error::{ChainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest, verify_signature};
use crate::wallet::{hash_pub_key, pub_key_hash_from_address};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_VOUT: i32 = -1;

/// A reference to an output of an earlier transaction, plus the material
/// proving the right to spend it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i32,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i32, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i32 {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    /// Whether this input was produced by the owner of `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }

    /// The output position as a slice index. Errors for the coinbase
    /// marker value.
    pub fn out_index(&self) -> Result<usize> {
        usize::try_from(self.vout)
            .map_err(|_| ChainError::VerifyFailed(format!("Invalid output index {}", self.vout)))
    }
}

/// An amount locked to a public key hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: i64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: i64, address: &str) -> Result<TXOutput> {
        if value <= 0 {
            return Err(ChainError::VerifyFailed(
                "Output value must be positive".to_string(),
            ));
        }
        let pub_key_hash = pub_key_hash_from_address(address)?;
        Ok(TXOutput {
            value,
            pub_key_hash,
        })
    }

    pub fn get_value(&self) -> i64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }

    /// Placeholder written into a spent slot of a stored output vector, so
    /// positional indices survive partial spending.
    pub fn zeroed() -> TXOutput {
        TXOutput {
            value: 0,
            pub_key_hash: vec![],
        }
    }

    pub fn is_zeroed(&self) -> bool {
        self.value == 0 && self.pub_key_hash.is_empty()
    }
}

/// A transfer of value: inputs consuming earlier outputs, and the new
/// outputs they fund. The id is the SHA-256 of the canonical form with
/// the id and all input signatures cleared, so it is independent of the
/// signatures themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
    timestamp: i64,
}

impl Transaction {
    /// The reward transaction opening every block. `data` is embedded in
    /// the input's pub_key field; random filler keeps ids unique when the
    /// caller has nothing to say.
    pub fn new_coinbase_tx(to: &str, data: &[u8]) -> Result<Transaction> {
        let txout = TXOutput::new(PAYMENT_FOR_BLOCK_MADE, to)?;
        let data = if data.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            data.to_vec()
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: data,
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![txout],
            timestamp: current_timestamp()?,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Assemble an unsigned transaction from prepared inputs and outputs.
    pub fn new_unsigned(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
            timestamp: current_timestamp()?,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// Canonical hash: id cleared, signatures cleared, everything else
    /// (including input pub keys and the timestamp) retained.
    fn hash(&self) -> Result<Vec<u8>> {
        let mut tx_copy = self.clone();
        tx_copy.id = vec![];
        for vin in tx_copy.vin.iter_mut() {
            vin.signature = vec![];
        }
        Ok(sha256_digest(serialize(&tx_copy)?.as_slice()))
    }

    /// Copy with signatures and pub keys stripped from every input. The
    /// signing and verification messages are built from this shape.
    fn trimmed_copy(&self) -> Transaction {
        let mut inputs = vec![];
        for input in &self.vin {
            inputs.push(TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            });
        }
        Transaction {
            id: vec![],
            vin: inputs,
            vout: self.vout.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Build the per-input messages a client must sign. For input `i` the
    /// trimmed copy carries the referenced output's pub key hash in place
    /// of the input's own pub key; everything else stays cleared. The
    /// returned list is indexed by input position.
    pub fn prepare_sign_data(
        &self,
        prev_txs: &HashMap<usize, Transaction>,
    ) -> Result<Vec<Vec<u8>>> {
        if self.is_coinbase() {
            return Ok(vec![]);
        }

        let mut tx_copy = self.trimmed_copy();
        let mut sign_data = Vec::with_capacity(self.vin.len());

        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_tx = prev_txs.get(&idx).ok_or_else(|| {
                ChainError::VerifyFailed(format!(
                    "No previous transaction for input {idx} of {}",
                    HEXLOWER.encode(self.id.as_slice())
                ))
            })?;
            let prev_out = prev_tx.vout.get(vin.out_index()?).ok_or_else(|| {
                ChainError::VerifyFailed(format!(
                    "Referenced output {} does not exist in {}",
                    vin.vout,
                    HEXLOWER.encode(vin.txid.as_slice())
                ))
            })?;

            tx_copy.vin[idx].pub_key = prev_out.pub_key_hash.clone();
            sign_data.push(sha256_digest(serialize(&tx_copy)?.as_slice()));
            tx_copy.vin[idx].pub_key = vec![];
        }

        Ok(sign_data)
    }

    /// Attach signatures produced over `prepare_sign_data` output and
    /// recompute the id.
    pub fn set_signatures(&mut self, signatures: Vec<Vec<u8>>) -> Result<()> {
        if signatures.len() != self.vin.len() {
            return Err(ChainError::BadSignature(format!(
                "Got {} signatures for {} inputs",
                signatures.len(),
                self.vin.len()
            )));
        }
        for (vin, signature) in self.vin.iter_mut().zip(signatures) {
            vin.signature = signature;
        }
        self.id = self.hash()?;
        Ok(())
    }

    /// Full verification against the referenced transactions: one sender
    /// key across all inputs, exact input/output sum equality, and a valid
    /// signature per input. Coinbase transactions only pass the structural
    /// reward check.
    pub fn verify(&self, prev_txs: &HashMap<usize, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return self.verify_coinbase();
        }

        if self.vin.is_empty() || self.vout.is_empty() {
            return Err(ChainError::VerifyFailed(
                "Transaction must have inputs and outputs".to_string(),
            ));
        }

        let sender = self.vin[0].pub_key.as_slice();
        if self.vin.iter().any(|vin| vin.pub_key != sender) {
            return Err(ChainError::VerifyFailed(
                "All inputs must be signed by the same key".to_string(),
            ));
        }

        let mut input_value: i64 = 0;
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_tx = prev_txs.get(&idx).ok_or_else(|| {
                ChainError::VerifyFailed(format!("No previous transaction for input {idx}"))
            })?;
            if prev_tx.id != vin.txid {
                return Err(ChainError::VerifyFailed(format!(
                    "Input {idx} references {} but was resolved to {}",
                    HEXLOWER.encode(vin.txid.as_slice()),
                    HEXLOWER.encode(prev_tx.id.as_slice())
                )));
            }
            let prev_out = prev_tx.vout.get(vin.out_index()?).ok_or_else(|| {
                ChainError::VerifyFailed(format!("Referenced output {} does not exist", vin.vout))
            })?;
            if !prev_out.is_locked_with_key(hash_pub_key(vin.pub_key.as_slice()).as_slice()) {
                return Err(ChainError::VerifyFailed(format!(
                    "Input {idx} does not own the referenced output"
                )));
            }
            input_value = input_value.checked_add(prev_out.value).ok_or_else(|| {
                ChainError::VerifyFailed("Input value overflow".to_string())
            })?;
        }

        let mut output_value: i64 = 0;
        for vout in &self.vout {
            if vout.value <= 0 {
                return Err(ChainError::VerifyFailed(
                    "Output value must be positive".to_string(),
                ));
            }
            output_value = output_value.checked_add(vout.value).ok_or_else(|| {
                ChainError::VerifyFailed("Output value overflow".to_string())
            })?;
        }

        if input_value != output_value {
            return Err(ChainError::VerifyFailed(format!(
                "Inputs carry {input_value} but outputs claim {output_value}"
            )));
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_tx = &prev_txs[&idx];
            let prev_out = &prev_tx.vout[vin.out_index()?];

            tx_copy.vin[idx].pub_key = prev_out.pub_key_hash.clone();
            let message = sha256_digest(serialize(&tx_copy)?.as_slice());
            tx_copy.vin[idx].pub_key = vec![];

            if !verify_signature(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                message.as_slice(),
            )? {
                return Err(ChainError::VerifyFailed(format!(
                    "Signature check failed for input {idx} of {}",
                    HEXLOWER.encode(self.id.as_slice())
                )));
            }
        }

        Ok(())
    }

    fn verify_coinbase(&self) -> Result<()> {
        if self.vout.is_empty() {
            return Err(ChainError::VerifyFailed(
                "Coinbase must pay the minter".to_string(),
            ));
        }
        if self.vout[0].value != PAYMENT_FOR_BLOCK_MADE {
            return Err(ChainError::VerifyFailed(format!(
                "Coinbase pays {} instead of {}",
                self.vout[0].value, PAYMENT_FOR_BLOCK_MADE
            )));
        }
        Ok(())
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_bytes(&self) -> Vec<u8> {
        self.id.clone()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transaction {}:", HEXLOWER.encode(self.id.as_slice()))?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "  Input {i}:")?;
            writeln!(f, "    TXID:   {}", HEXLOWER.encode(input.txid.as_slice()))?;
            writeln!(f, "    Out:    {}", input.vout)?;
            writeln!(
                f,
                "    PubKey: {}",
                HEXLOWER.encode(input.pub_key.as_slice())
            )?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "  Output {i}:")?;
            writeln!(f, "    Value:  {}", output.value)?;
            writeln!(
                f,
                "    Script: {}",
                HEXLOWER.encode(output.pub_key_hash.as_slice())
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn sign_all(tx: &mut Transaction, wallet: &Wallet, prev_txs: &HashMap<usize, Transaction>) {
        let sign_data = tx.prepare_sign_data(prev_txs).unwrap();
        let signatures = sign_data
            .iter()
            .map(|data| crate::utils::sign_data(wallet.get_pkcs8(), data).unwrap())
            .collect();
        tx.set_signatures(signatures).unwrap();
    }

    #[test]
    fn test_coinbase_shape() {
        let wallet = Wallet::new().unwrap();
        let tx = Transaction::new_coinbase_tx(&wallet.get_address(), b"genesis").unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.get_vin().len(), 1);
        assert_eq!(tx.get_vin()[0].get_vout(), COINBASE_VOUT);
        assert!(tx.get_vin()[0].get_txid().is_empty());
        assert_eq!(tx.get_vout()[0].get_value(), PAYMENT_FOR_BLOCK_MADE);
        assert_eq!(tx.get_id().len(), 32);
    }

    #[test]
    fn test_coinbase_to_bad_address_is_rejected() {
        let result = Transaction::new_coinbase_tx("definitely-not-an-address", &[]);
        assert!(matches!(result, Err(ChainError::BadAddress(_))));
    }

    #[test]
    fn test_id_is_independent_of_signatures() {
        let wallet = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), &[]).unwrap();

        let input = TXInput::new(coinbase.get_id(), 0, wallet.get_public_key());
        let output = TXOutput::new(PAYMENT_FOR_BLOCK_MADE, &recipient.get_address()).unwrap();
        let mut tx = Transaction::new_unsigned(vec![input], vec![output]).unwrap();
        let unsigned_id = tx.get_id_bytes();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(0, coinbase);
        sign_all(&mut tx, &wallet, &prev_txs);

        assert_eq!(tx.get_id_bytes(), unsigned_id);
        assert!(!tx.get_vin()[0].get_signature().is_empty());
    }

    #[test]
    fn test_serialization_round_trip() {
        let wallet = Wallet::new().unwrap();
        let tx = Transaction::new_coinbase_tx(&wallet.get_address(), b"payload").unwrap();

        let bytes = tx.serialize().unwrap();
        let decoded = Transaction::deserialize(bytes.as_slice()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_sign_and_verify() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&sender.get_address(), &[]).unwrap();

        let input = TXInput::new(coinbase.get_id(), 0, sender.get_public_key());
        let outputs = vec![
            TXOutput::new(3 * crate::core::monetary::UNITS_PER_COIN, &recipient.get_address())
                .unwrap(),
            TXOutput::new(7 * crate::core::monetary::UNITS_PER_COIN, &sender.get_address())
                .unwrap(),
        ];
        let mut tx = Transaction::new_unsigned(vec![input], outputs).unwrap();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(0, coinbase);
        sign_all(&mut tx, &sender, &prev_txs);

        assert!(tx.verify(&prev_txs).is_ok());
    }

    #[test]
    fn test_verify_rejects_unbalanced_sums() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&sender.get_address(), &[]).unwrap();

        let input = TXInput::new(coinbase.get_id(), 0, sender.get_public_key());
        // claims one unit more than the input carries
        let output =
            TXOutput::new(PAYMENT_FOR_BLOCK_MADE + 1, &recipient.get_address()).unwrap();
        let mut tx = Transaction::new_unsigned(vec![input], vec![output]).unwrap();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(0, coinbase);
        sign_all(&mut tx, &sender, &prev_txs);

        assert!(matches!(
            tx.verify(&prev_txs),
            Err(ChainError::VerifyFailed(_))
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_signature() {
        let sender = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&sender.get_address(), &[]).unwrap();

        // the thief signs an input they do not own
        let input = TXInput::new(coinbase.get_id(), 0, thief.get_public_key());
        let output = TXOutput::new(PAYMENT_FOR_BLOCK_MADE, &recipient.get_address()).unwrap();
        let mut tx = Transaction::new_unsigned(vec![input], vec![output]).unwrap();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(0, coinbase);
        sign_all(&mut tx, &thief, &prev_txs);

        // signature itself verifies, but against the wrong owner hash in
        // the message, so the check fails
        assert!(tx.verify(&prev_txs).is_err());
    }

    #[test]
    fn test_set_signatures_arity_mismatch() {
        let sender = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&sender.get_address(), &[]).unwrap();
        let input = TXInput::new(coinbase.get_id(), 0, sender.get_public_key());
        let output = TXOutput::new(PAYMENT_FOR_BLOCK_MADE, &sender.get_address()).unwrap();
        let mut tx = Transaction::new_unsigned(vec![input], vec![output]).unwrap();

        let result = tx.set_signatures(vec![vec![0; 64], vec![0; 64]]);
        assert!(matches!(result, Err(ChainError::BadSignature(_))));
    }
}
