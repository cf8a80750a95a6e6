use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// The local wallet collection, keyed by address. It lives as one
/// bincode file inside the node's data directory, next to the chain
/// database, and every mutation is written back before it is reported
/// as done.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    file_path: PathBuf,
}

impl Wallets {
    /// Open the collection stored under `data_dir`. A missing wallet
    /// file means an empty collection; an unreadable one is an error,
    /// not a silent reset.
    pub fn open(data_dir: &Path) -> Result<Wallets> {
        let file_path = data_dir.join(WALLET_FILE);
        let wallets = if file_path.exists() {
            let bytes = fs::read(file_path.as_path())
                .map_err(|e| ChainError::Wallet(format!("Failed to read wallet file: {e}")))?;
            deserialize(bytes.as_slice())?
        } else {
            HashMap::new()
        };
        Ok(Wallets { wallets, file_path })
    }

    /// Generate a key pair, persist the collection, and return the new
    /// address.
    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        Ok(address)
    }

    /// All known addresses, sorted for stable listings.
    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ChainError::Wallet(format!("Failed to create data dir: {e}")))?;
        }
        let bytes = serialize(&self.wallets)?;
        fs::write(self.file_path.as_path(), bytes)
            .map_err(|e| ChainError::Wallet(format!("Failed to write wallet file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{sha256_digest, sign_data, verify_signature};
    use tempfile::tempdir;

    #[test]
    fn test_starts_empty_without_file() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::open(dir.path()).unwrap();
        assert!(wallets.get_addresses().is_empty());
        assert!(wallets.get_wallet("unknown").is_none());
    }

    #[test]
    fn test_wallets_survive_reopen() {
        let dir = tempdir().unwrap();
        let first;
        let second;
        {
            let mut wallets = Wallets::open(dir.path()).unwrap();
            first = wallets.create_wallet().unwrap();
            second = wallets.create_wallet().unwrap();
        }

        let wallets = Wallets::open(dir.path()).unwrap();
        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(wallets.get_addresses(), expected);

        // a reloaded key still signs for its address
        let wallet = wallets.get_wallet(first.as_str()).unwrap();
        assert_eq!(wallet.get_address(), first);
        let message = sha256_digest(b"probe");
        let signature = sign_data(wallet.get_pkcs8(), message.as_slice()).unwrap();
        assert!(verify_signature(
            wallet.get_public_key(),
            signature.as_slice(),
            message.as_slice()
        )
        .unwrap());
    }

    #[test]
    fn test_wallet_file_lands_in_data_dir() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("node-a");

        let mut wallets = Wallets::open(data_dir.as_path()).unwrap();
        wallets.create_wallet().unwrap();
        assert!(data_dir.join(WALLET_FILE).exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(WALLET_FILE), b"not a wallet file").unwrap();

        assert!(matches!(
            Wallets::open(dir.path()),
            Err(ChainError::Serialization(_))
        ));
    }
}
