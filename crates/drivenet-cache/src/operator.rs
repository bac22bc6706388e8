//! OpenDAL-backed cache store
//!
//! Any OpenDAL service can hold cached blobs; the binary uses the local `fs`
//! service so cached previews survive restarts. Keys are sharded two levels
//! deep (`{key[0..2]}/{key}`) to keep directories small.

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{ErrorKind, Operator};
use std::path::Path;

use crate::error::{CacheError, CacheResult};
use crate::storage::CacheStorage;

/// Build an OpenDAL operator rooted at a local directory.
pub fn build_fs_operator(root: &Path) -> CacheResult<Operator> {
    let root = root
        .to_str()
        .ok_or_else(|| CacheError::Storage(format!("cache dir is not UTF-8: {}", root.display())))?;
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// [`CacheStorage`] over an OpenDAL operator. Sizes come from object metadata.
#[derive(Clone)]
pub struct OperatorStorage {
    op: Operator,
}

impl OperatorStorage {
    pub fn new(op: Operator) -> Self {
        OperatorStorage { op }
    }

    fn path_for(key: &str) -> String {
        let prefix = if key.len() >= 2 && key.is_char_boundary(2) {
            &key[..2]
        } else {
            "xx"
        };
        format!("{prefix}/{key}")
    }

    /// Remove every stored blob, returning how many were deleted.
    ///
    /// Used when no ledger accounts for the store's contents.
    pub async fn clear(&self) -> CacheResult<usize> {
        let entries = match self.op.list_with("/").recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries.into_iter().filter(|e| e.metadata().is_file()) {
            self.op.delete(entry.path()).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheStorage<Bytes> for OperatorStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        match self.op.read(&Self::path_for(key)).await {
            Ok(buf) => Ok(Some(buf.to_bytes())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Bytes, _size: u64) -> CacheResult<()> {
        self.op.write(&Self::path_for(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        // OpenDAL treats deleting a missing object as success
        self.op.delete(&Self::path_for(key)).await?;
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.op.exists(&Self::path_for(key)).await?)
    }

    async fn size_of(&self, key: &str) -> CacheResult<Option<u64>> {
        match self.op.stat(&Self::path_for(key)).await {
            Ok(meta) => Ok(Some(meta.content_length())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
