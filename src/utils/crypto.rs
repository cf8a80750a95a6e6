// Cryptographic conventions of the whole system live here: hashes are
// SHA-256, owner hashes are ripemd160 over sha256, signatures are the
// fixed 64-byte r||s form of ECDSA P-256, and public keys travel as the
// 65-byte uncompressed point. Callers never deal with DER or compressed
// encodings.

use crate::error::{ChainError, Result};
use ring::digest::{digest, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of every hash in the system (SHA-256 output)
pub const HASH_LEN: usize = 32;

/// Signatures are two raw 32-byte scalars, `r` then `s`
pub const SIGNATURE_LEN: usize = 64;

/// Public keys are uncompressed P-256 points: a 0x04 tag, then x and y
pub const PUBLIC_KEY_LEN: usize = 65;

const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Bytes of the double-SHA-256 checksum embedded in every address
pub const CHECKSUM_LEN: usize = 4;

/// Milliseconds since the Unix epoch. Transaction ordering in the pool
/// relies on this clock being monotonic enough within one process.
pub fn current_timestamp() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ChainError::Crypto(format!("System clock is before the epoch: {e}")))?;
    i64::try_from(elapsed.as_millis())
        .map_err(|_| ChainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    digest(&SHA256, data).as_ref().to_vec()
}

/// SHA-256 applied twice. Address checksums use this form.
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256_digest(sha256_digest(data).as_slice())
}

/// The first bytes of the double hash, appended to address payloads.
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    double_sha256(payload)[..CHECKSUM_LEN].to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// ripemd160 over sha256: the 20-byte owner hash locking outputs and
/// embedded in addresses.
pub fn hash160(data: &[u8]) -> Vec<u8> {
    ripemd160_digest(sha256_digest(data).as_slice())
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| ChainError::BadAddress(format!("Invalid base58 encoding: {e}")))
}

/// Generate a fresh P-256 key pair: the PKCS#8 private key and the
/// matching uncompressed public point.
pub fn generate_key_pair() -> Result<(Vec<u8>, Vec<u8>)> {
    let rng = SystemRandom::new();
    let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| ChainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?;
    let pkcs8 = document.as_ref().to_vec();
    let public_key = load_key_pair(pkcs8.as_slice())?
        .public_key()
        .as_ref()
        .to_vec();
    Ok((pkcs8, public_key))
}

fn load_key_pair(pkcs8: &[u8]) -> Result<EcdsaKeyPair> {
    let rng = SystemRandom::new();
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| ChainError::Crypto(format!("Failed to load key pair from PKCS8: {e}")))
}

/// Sign a message with a PKCS#8 key. The result is always
/// SIGNATURE_LEN bytes of raw `r||s`.
pub fn sign_data(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let signature = load_key_pair(pkcs8)?
        .sign(&rng, message)
        .map_err(|e| ChainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    if signature.len() != SIGNATURE_LEN {
        return Err(ChainError::Crypto(format!(
            "Unexpected signature length {}",
            signature.len()
        )));
    }
    Ok(signature)
}

/// Verify an `r||s` signature under an uncompressed public point.
/// Inputs with the wrong shape fail with `BadSignature` before any
/// curve math; a well-formed signature that does not match returns
/// `Ok(false)`.
pub fn verify_signature(public_key: &[u8], signature: &[u8], message: &[u8]) -> Result<bool> {
    if public_key.len() != PUBLIC_KEY_LEN || public_key[0] != UNCOMPRESSED_POINT_TAG {
        return Err(ChainError::BadSignature(
            "Public key is not an uncompressed P-256 point".to_string(),
        ));
    }
    if signature.len() != SIGNATURE_LEN {
        return Err(ChainError::BadSignature(format!(
            "Signature must be {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }

    let key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key);
    Ok(key.verify(message, signature).is_ok())
}
