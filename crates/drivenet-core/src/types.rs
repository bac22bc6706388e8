use serde::{Deserialize, Serialize};

/// Integrity tag recorded by the bridge for a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hmac {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Metadata of a stored file, fetched once per transfer and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub bucket_id: String,
    pub file_id: String,
    /// Plaintext (and ciphertext) length in bytes
    pub size: u64,
    pub mime_type: String,
    pub name: String,
    pub created_at: String,
    /// Raw crypto index; the first 16 bytes are the IV
    pub crypto_index: Vec<u8>,
    pub hmac: Option<Hmac>,
}

/// Location of one ciphertext shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub url: String,
    pub shard_index: u32,
}

/// Sort mirrors into the order their contents must be concatenated in.
pub fn order_mirrors(mut mirrors: Vec<Mirror>) -> Vec<Mirror> {
    mirrors.sort_by_key(|m| m.shard_index);
    mirrors
}

/// Byte counters for one transfer. `transferred_bytes` never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}

impl ProgressState {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
        }
    }

    /// Count `n` more bytes and return the new running total.
    pub fn advance(&mut self, n: u64) -> u64 {
        self.transferred_bytes = self.transferred_bytes.saturating_add(n);
        self.transferred_bytes
    }

    /// Raise the counter to `value`; lower values are ignored.
    pub fn raise_to(&mut self, value: u64) -> u64 {
        self.transferred_bytes = self.transferred_bytes.max(value);
        self.transferred_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}
