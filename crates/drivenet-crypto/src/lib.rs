//! drivenet-crypto: client-side encryption for network transfers
//!
//! Every stored file is encrypted with AES-256-CTR. Keys are never stored;
//! they are re-derived from the account mnemonic on each transfer:
//!
//! ```text
//! BIP-39 seed (mnemonic, passphrase "")
//!   └── Bucket Key  = SHA-512(seed || bucket_id)[..32]
//!       └── File Key = SHA-512(bucket_key || crypto_index)[..32]
//! IV = crypto_index[..16]
//! ```
//!
//! The crypto index is random per file and stored with the file metadata, so
//! anyone holding the mnemonic can re-derive the key for any file.

pub mod auth;
pub mod error;
pub mod keys;
pub mod stream;

pub use auth::{content_hash, hash_password};
pub use error::{CryptoError, CryptoResult};
pub use keys::{derive_key, extract_iv, generate_index, TransferKey};
pub use stream::{make_cipher_stream, make_decipher_stream, CtrTransform};

/// Size of a transfer key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the AES-CTR initialization vector
pub const IV_SIZE: usize = 16;

/// Size of a freshly generated crypto index
pub const INDEX_SIZE: usize = 32;
