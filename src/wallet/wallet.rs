use crate::error::{ChainError, Result};
use crate::utils::{base58_decode, base58_encode, checksum, generate_key_pair, hash160};
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = crate::utils::crypto::CHECKSUM_LEN;

/// An ECDSA P-256 key pair. The private key is kept as PKCS#8 bytes, the
/// public key as the 65-byte uncompressed point.
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let (pkcs8, public_key) = generate_key_pair()?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// Base58 address: version byte, then the public key hash, then a
    /// four-byte checksum over both.
    pub fn get_address(&self) -> String {
        convert_address(hash_pub_key(self.public_key.as_slice()).as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

/// The 20-byte owner hash of a public key, as embedded in outputs and
/// addresses.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    hash160(pub_key)
}

/// An address is valid when the recomputed checksum over its version byte
/// and public key hash matches the embedded one.
pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };

    if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }

    let actual_checksum = &payload[payload.len() - ADDRESS_CHECK_SUM_LEN..];
    let target_checksum = checksum(&payload[..payload.len() - ADDRESS_CHECK_SUM_LEN]);
    actual_checksum.eq(target_checksum.as_slice())
}

/// Build the Base58 address for a public key hash.
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_key_hash);
    let check = checksum(payload.as_slice());
    payload.extend(check.as_slice());
    base58_encode(payload.as_slice())
}

/// Extract the public key hash embedded in an address.
pub fn pub_key_hash_from_address(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(ChainError::BadAddress(address.to_string()));
    }
    let payload = base58_decode(address)?;
    Ok(payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();

        assert!(validate_address(&address));

        let hash = pub_key_hash_from_address(&address).unwrap();
        assert_eq!(hash, hash_pub_key(wallet.get_public_key()));
        assert_eq!(hash.len(), 20);
        assert_eq!(convert_address(&hash), address);
    }

    #[test]
    fn test_corrupted_address_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut address = wallet.get_address();
        // flip the last character to break the checksum
        let tail = if address.ends_with('1') { '2' } else { '1' };
        address.pop();
        address.push(tail);

        assert!(!validate_address(&address));
        assert!(matches!(
            pub_key_hash_from_address(&address),
            Err(ChainError::BadAddress(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(!validate_address(""));
        assert!(!validate_address("0OIl"));
        assert!(!validate_address("abc"));
    }
}
