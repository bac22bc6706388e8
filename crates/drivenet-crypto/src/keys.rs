//! File key derivation: mnemonic + bucket id + crypto index → 256-bit key

use bip39::Mnemonic;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{INDEX_SIZE, IV_SIZE, KEY_SIZE};

/// A per-file 256-bit AES key. Zeroized on drop, never persisted.
#[derive(Clone)]
pub struct TransferKey {
    bytes: [u8; KEY_SIZE],
}

impl TransferKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from caller-supplied raw bytes, which must be exactly 32 long.
    pub fn from_slice(raw: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = raw
            .try_into()
            .map_err(|_| CryptoError::KeyLength(raw.len()))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for TransferKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for TransferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the key for one file.
///
/// Deterministic: the same mnemonic, bucket and index always give the same
/// key, so nothing about the key has to be stored.
pub fn derive_key(
    mnemonic: &SecretString,
    bucket_id: &str,
    crypto_index: &[u8],
) -> CryptoResult<TransferKey> {
    let words = mnemonic.expose_secret().trim();
    if words.is_empty() {
        return Err(CryptoError::KeyDerivation("mnemonic is empty".into()));
    }
    if crypto_index.is_empty() {
        return Err(CryptoError::KeyDerivation("crypto index is empty".into()));
    }
    if bucket_id.is_empty() {
        return Err(CryptoError::KeyDerivation("bucket id is empty".into()));
    }
    let bucket_bytes = hex::decode(bucket_id).map_err(|e| {
        CryptoError::KeyDerivation(format!("bucket id is not hex ({bucket_id}): {e}"))
    })?;

    let parsed: Mnemonic = words
        .parse()
        .map_err(|e| CryptoError::KeyDerivation(format!("invalid BIP-39 mnemonic: {e}")))?;
    let mut seed = parsed.to_seed("");

    let mut bucket_key = deterministic_key(&seed, &bucket_bytes);
    seed.zeroize();

    let mut file_key = deterministic_key(&bucket_key[..KEY_SIZE], crypto_index);
    bucket_key.zeroize();

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&file_key[..KEY_SIZE]);
    file_key.zeroize();

    tracing::trace!(bucket = %bucket_id, "derived file key");
    Ok(TransferKey::from_bytes(bytes))
}

/// SHA-512(key || data)
fn deterministic_key(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(key);
    hasher.update(data);
    hasher.finalize().into()
}

/// The IV is the first 16 bytes of the crypto index.
pub fn extract_iv(crypto_index: &[u8]) -> CryptoResult<[u8; IV_SIZE]> {
    crypto_index
        .get(..IV_SIZE)
        .and_then(|head| head.try_into().ok())
        .ok_or_else(|| {
            CryptoError::KeyDerivation(format!(
                "crypto index too short: {} bytes (minimum {IV_SIZE})",
                crypto_index.len()
            ))
        })
}

/// Generate a fresh random crypto index for a new upload.
pub fn generate_index() -> [u8; INDEX_SIZE] {
    let mut index = [0u8; INDEX_SIZE];
    rand::thread_rng().fill_bytes(&mut index);
    index
}
