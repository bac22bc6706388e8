//! AES-256-CTR streaming transform
//!
//! CTR turns AES into a stream cipher: output length always equals input
//! length and there is no padding, so a transfer can be transformed chunk by
//! chunk as bytes arrive. Encryption and decryption are the same keystream
//! XOR; the two constructors exist so call sites read in the right direction.

use aes::Aes256;
use bytes::{Bytes, BytesMut};
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::keys::TransferKey;
use crate::IV_SIZE;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Direction of a transform (only affects logging and `Debug` output)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Stateful keystream positioned at offset 0 of a file.
///
/// Each `update` call continues where the previous one stopped, so chunk
/// boundaries never affect the output.
pub struct CtrTransform {
    cipher: Aes256Ctr,
    direction: Direction,
    processed: u64,
}

impl CtrTransform {
    fn new(key: &TransferKey, iv: &[u8; IV_SIZE], direction: Direction) -> Self {
        Self {
            cipher: Aes256Ctr::new(key.as_bytes().into(), iv.into()),
            direction,
            processed: 0,
        }
    }

    /// Transform one chunk, returning a buffer of the same length.
    pub fn update(&mut self, chunk: &[u8]) -> Bytes {
        let mut buf = BytesMut::from(chunk);
        self.cipher.apply_keystream(&mut buf);
        self.processed += chunk.len() as u64;
        buf.freeze()
    }

    /// Transform a chunk in place.
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
        self.processed += buf.len() as u64;
    }

    /// Bytes transformed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl std::fmt::Debug for CtrTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrTransform")
            .field("direction", &self.direction)
            .field("processed", &self.processed)
            .finish()
    }
}

pub fn make_cipher_stream(key: &TransferKey, iv: &[u8; IV_SIZE]) -> CtrTransform {
    CtrTransform::new(key, iv, Direction::Encrypt)
}

pub fn make_decipher_stream(key: &TransferKey, iv: &[u8; IV_SIZE]) -> CtrTransform {
    CtrTransform::new(key, iv, Direction::Decrypt)
}
