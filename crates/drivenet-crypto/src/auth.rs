//! Credential and content digests sent to the bridge

use sha2::{Digest, Sha256};

/// Derive the bridge authentication secret from a plaintext password.
///
/// The bridge never sees the password itself, only its lowercase hex SHA-256.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Lowercase hex SHA-256 of an encrypted shard, recorded at upload commit.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
